//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 等待队列 (Wait Queue)
//!
//! 阻塞/唤醒的基础设施，对应 Linux 的 wait_queue_head
//! (include/linux/wait.h)。互斥锁的等待者队列、join 队列与睡眠队列
//! 都建立在它之上。
//!
//! 唤醒次序由队列策略决定：FIFO 严格按入队次序；Priority 按优先级，
//! 同优先级之间仍按入队次序。一次唤醒恰好摘下一个等待者，唤醒与
//! 阻塞的竞争由队列锁内检查条件来消除（见 `block_current_unless`）。

use crate::hal::IrqGuard;
use crate::sched;
use crate::task::task::{Task, TaskState};
use alloc::collections::VecDeque;
use alloc::sync::Arc;

/// 唤醒次序策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePolicy {
    /// 严格按入队次序唤醒
    Fifo,
    /// 按优先级唤醒，同优先级按入队次序
    Priority,
}

/// 等待队列
pub struct WaitQueue {
    policy: QueuePolicy,
    list: spin::Mutex<VecDeque<Arc<Task>>>,
}

impl WaitQueue {
    /// 创建 FIFO 等待队列
    pub const fn new() -> Self {
        Self::with_policy(QueuePolicy::Fifo)
    }

    /// 创建指定策略的等待队列
    pub const fn with_policy(policy: QueuePolicy) -> Self {
        Self {
            policy,
            list: spin::Mutex::new(VecDeque::new()),
        }
    }

    /// 按策略插入（调用者持有队列锁）
    fn insert(&self, list: &mut VecDeque<Arc<Task>>, task: Arc<Task>) {
        match self.policy {
            QueuePolicy::Fifo => list.push_back(task),
            QueuePolicy::Priority => {
                // 插到第一个更不紧急的等待者之前，同优先级排在其后
                let pos = list
                    .iter()
                    .position(|t| t.priority() > task.priority())
                    .unwrap_or(list.len());
                list.insert(pos, task);
            }
        }
    }

    /// 把任务置为 Blocked 并入队（不触发调度）
    pub(crate) fn enqueue_blocked(&self, task: Arc<Task>) {
        let mut list = self.list.lock();
        task.set_state(TaskState::Blocked);
        task.set_waiting_on(self as *const WaitQueue);
        self.insert(&mut list, task);
    }

    /// 按策略摘下一个等待者（不唤醒）
    pub(crate) fn take_one(&self) -> Option<Arc<Task>> {
        let task = self.list.lock().pop_front()?;
        task.set_waiting_on(core::ptr::null());
        Some(task)
    }

    /// 阻塞当前任务直到被唤醒
    pub fn block_current(&self) {
        self.block_current_unless(|| false);
    }

    /// 条件成立则直接返回 false，否则阻塞直到被唤醒并返回 true
    ///
    /// 条件在队列锁内求值：与“先改状态、后在同一把锁下唤醒”的
    /// 通知方配对使用时不会丢失唤醒。
    pub fn block_current_unless<F: FnOnce() -> bool>(&self, cond: F) -> bool {
        let _irq = IrqGuard::new();
        let current = sched::current_task();
        {
            let mut list = self.list.lock();
            if cond() {
                return false;
            }
            current.set_state(TaskState::Blocked);
            current.set_waiting_on(self as *const WaitQueue);
            // 阻塞期间栈上不保留引用，队列持有唯一的调度簿记引用
            self.insert(&mut list, current);
        }
        sched::schedule();
        true
    }

    /// 唤醒一个等待者，返回是否有等待者被唤醒
    pub fn wake_one(&self) -> bool {
        let _irq = IrqGuard::new();
        match self.take_one() {
            Some(task) => {
                sched::make_ready(task);
                true
            }
            None => false,
        }
    }

    /// 唤醒全部等待者，返回唤醒的数量
    pub fn wake_all(&self) -> usize {
        let _irq = IrqGuard::new();
        let mut woken = 0;
        while let Some(task) = self.take_one() {
            sched::make_ready(task);
            woken += 1;
        }
        woken
    }

    /// 把指定任务从队列中摘除（强制终止路径），返回是否在队列中
    pub(crate) fn remove(&self, task: &Arc<Task>) -> bool {
        let mut list = self.list.lock();
        let before = list.len();
        list.retain(|t| !Arc::ptr_eq(t, task));
        if list.len() != before {
            task.set_waiting_on(core::ptr::null());
            true
        } else {
            false
        }
    }

    /// 队列是否为空
    pub fn is_empty(&self) -> bool {
        self.list.lock().is_empty()
    }

    /// 等待者数量
    pub fn len(&self) -> usize {
        self.list.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::task::TaskFlags;

    fn bare(tid: u32, priority: u8) -> Arc<Task> {
        Arc::new(Task::new(
            tid,
            None,
            priority,
            0,
            TaskFlags::empty(),
            None,
            None,
            None,
        ))
    }

    #[test]
    fn test_fifo_order() {
        let queue = WaitQueue::new();
        queue.enqueue_blocked(bare(1, 5));
        queue.enqueue_blocked(bare(2, 1));
        queue.enqueue_blocked(bare(3, 9));
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.take_one().unwrap().tid(), 1);
        assert_eq!(queue.take_one().unwrap().tid(), 2);
        assert_eq!(queue.take_one().unwrap().tid(), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_priority_order_with_fifo_tiebreak() {
        let queue = WaitQueue::with_policy(QueuePolicy::Priority);
        queue.enqueue_blocked(bare(1, 5));
        queue.enqueue_blocked(bare(2, 1));
        queue.enqueue_blocked(bare(3, 5));
        queue.enqueue_blocked(bare(4, 1));
        assert_eq!(queue.take_one().unwrap().tid(), 2);
        assert_eq!(queue.take_one().unwrap().tid(), 4);
        assert_eq!(queue.take_one().unwrap().tid(), 1);
        assert_eq!(queue.take_one().unwrap().tid(), 3);
    }

    #[test]
    fn test_remove_blocked_task() {
        let queue = WaitQueue::new();
        let victim = bare(1, 5);
        queue.enqueue_blocked(Arc::clone(&victim));
        queue.enqueue_blocked(bare(2, 5));
        assert!(!victim.waiting_on().is_null());
        assert!(queue.remove(&victim));
        assert!(victim.waiting_on().is_null());
        assert!(!queue.remove(&victim));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.take_one().unwrap().tid(), 2);
    }
}
