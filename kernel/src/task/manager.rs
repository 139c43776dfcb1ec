//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 任务管理器
//!
//! 任务的创建、join 与强制终止，以及 tid 到任务的注册表。
//!
//! 生命周期：spawn 分配栈与 TLS 并注册 → 跳板首次被调度时取走入口
//! 闭包执行 → 返回或被终止后进入 Exited → join 者取走退出码并从
//! 注册表摘除 → 最后一个引用被丢弃时归还栈与 TLS。从不被 join 的
//! 任务会一直留在注册表中（僵尸），这是有意的：退出码必须可取。

use crate::config::{DEFAULT_PRIORITY, DEFAULT_STACK_SIZE, NUM_PRIORITIES, TLS_AREA_SIZE};
use crate::errno::KernelError;
use crate::hal::{self, IrqGuard};
use crate::mm;
use crate::sched::{self, tid::alloc_tid};
use crate::task::task::{Task, TaskFlags, TaskState, Tid};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use log::{debug, warn};

/// 被强制终止的任务的退出码
pub const KILLED_EXIT_CODE: i32 = -1;

/// 全局任务注册表
static TASK_TABLE: spin::Mutex<BTreeMap<Tid, Arc<Task>>> = spin::Mutex::new(BTreeMap::new());

/// 任务句柄
///
/// 持有对任务的拥有性引用，可自由克隆与跨任务传递。
#[derive(Clone)]
pub struct TaskHandle {
    task: Arc<Task>,
}

impl TaskHandle {
    #[inline]
    pub fn tid(&self) -> Tid {
        self.task.tid()
    }

    #[inline]
    pub fn name(&self) -> Option<&'static str> {
        self.task.name()
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.task.state()
    }

    #[inline]
    pub fn priority(&self) -> u8 {
        self.task.priority()
    }

    /// 等待任务退出并取走退出码
    ///
    /// 每个任务只允许被 join 一次；idle / boot 任务与自身不可 join。
    pub fn join(&self) -> Result<i32, KernelError> {
        if !self.task.is_joinable() {
            return Err(KernelError::InvalidHandle);
        }
        if Arc::ptr_eq(&self.task, &sched::current_task()) {
            return Err(KernelError::InvalidHandle);
        }
        if !self.task.try_claim_join() {
            return Err(KernelError::AlreadyJoined);
        }
        // 名额登记在 join 者身上：join 者在等待期间被强制终止时，
        // kill 据此把名额归还给目标（目标仍可被别人 join 并回收）
        sched::current_task().set_pending_join(Arc::clone(&self.task));
        // 条件在 join 队列锁内复查，与退出方"先置 Exited 再唤醒"配对，
        // 不会丢失唤醒
        while self.task.state() != TaskState::Exited {
            self.task
                .join_queue()
                .block_current_unless(|| self.task.state() == TaskState::Exited);
        }
        sched::current_task().clear_pending_join();
        TASK_TABLE.lock().remove(&self.task.tid());
        Ok(self.task.exit_code())
    }

    /// 强制终止任务
    ///
    /// 任务仍持有的互斥锁按交接路径释放，join 者被唤醒并得到
    /// [`KILLED_EXIT_CODE`]。终止自身等价于以该退出码退出。
    /// 正在其他 CPU 上运行的任务无法终止。
    pub fn kill(&self) -> Result<(), KernelError> {
        if !self.task.is_joinable() {
            return Err(KernelError::InvalidHandle);
        }
        if Arc::ptr_eq(&self.task, &sched::current_task()) {
            sched::exit_current(KILLED_EXIT_CODE);
        }

        let _irq = IrqGuard::new();
        // 先把任务从当前所处的位置摘下来；与唤醒方竞争时状态可能
        // 在 Blocked / Ready 之间迁移，失败则按新状态重试
        loop {
            match self.task.state() {
                TaskState::Exited => return Ok(()),
                TaskState::Running => return Err(KernelError::InvalidHandle),
                TaskState::Ready => {
                    if sched::remove_ready(&self.task) {
                        break;
                    }
                    core::hint::spin_loop();
                }
                TaskState::Blocked => {
                    let queue = self.task.waiting_on();
                    let removed = if queue.is_null() {
                        sched::remove_sleeper(&self.task)
                    } else {
                        // waiting_on 在任务摘下前始终指向有效队列
                        unsafe { (*queue).remove(&self.task) }
                    };
                    if removed {
                        break;
                    }
                    core::hint::spin_loop();
                }
            }
        }

        debug!("task: killing task {}", self.task.tid());
        self.task.mark_killed();
        if let Some(target) = self.task.take_pending_join() {
            // 死在 join 等待中：名额归还，目标不会变成不可回收的僵尸
            target.release_join_claim();
        }
        if self.task.take_entry().is_some() {
            // 从未被调度过，跳板参数里寄存的引用一并收回
            unsafe { drop(Arc::from_raw(Arc::as_ptr(&self.task))) };
        }
        let held = self.task.take_held_locks();
        if !held.is_empty() {
            warn!("task: task {} killed holding {} lock(s)", self.task.tid(), held.len());
        }
        for raw in held {
            // 持锁记录存在期间锁对象必然存活
            unsafe { (*raw).force_release(&self.task) };
        }
        self.task.set_exit_code(KILLED_EXIT_CODE);
        self.task.set_state(TaskState::Exited);
        self.task.join_queue().wake_all();
        TASK_TABLE.lock().remove(&self.task.tid());
        Ok(())
    }
}

/// 跳板：任务首次被调度时的入口
///
/// 参数是 spawn 移交的 `Arc<Task>` 裸指针。跳板取走入口闭包后立即
/// 归还这份引用，闭包执行期间不再握着它，强制终止时引用计数才能
/// 如期归零。
fn task_trampoline(arg: usize) -> ! {
    let task = unsafe { Arc::from_raw(arg as *const Task) };
    let entry = task.take_entry();
    drop(task);
    let code = match entry {
        Some(entry) => entry(),
        None => 0,
    };
    sched::exit_current(code);
}

/// 以默认栈大小与默认优先级创建任务
pub fn spawn<F>(name: &'static str, entry: F) -> Result<TaskHandle, KernelError>
where
    F: FnOnce() -> i32 + Send + 'static,
{
    spawn_with(name, DEFAULT_PRIORITY, DEFAULT_STACK_SIZE, entry)
}

/// 创建任务，指定优先级与栈大小
///
/// 任务固定归属创建者所在的 CPU。优先级超出范围时收敛到最不紧急的
/// 一档。栈或 TLS 分配失败时返回 `OutOfMemory`，不留下任何痕迹。
pub fn spawn_with<F>(
    name: &'static str,
    priority: u8,
    stack_size: usize,
    entry: F,
) -> Result<TaskHandle, KernelError>
where
    F: FnOnce() -> i32 + Send + 'static,
{
    let priority = priority.min(NUM_PRIORITIES - 1);

    let stack = mm::provider().allocate(stack_size)?;
    let tls = match mm::provider().allocate(TLS_AREA_SIZE) {
        Ok(tls) => tls,
        Err(err) => {
            mm::provider().free(stack);
            return Err(err);
        }
    };

    let platform = hal::platform();
    let task = Arc::new(Task::new(
        alloc_tid(),
        Some(name),
        priority,
        platform.cpu_id(),
        TaskFlags::empty(),
        Some(stack),
        Some(tls),
        Some(Box::new(entry)),
    ));
    platform.context_init(
        task.context(),
        task.stack_top(),
        task_trampoline,
        Arc::into_raw(Arc::clone(&task)) as usize,
    );

    TASK_TABLE.lock().insert(task.tid(), Arc::clone(&task));
    {
        let _irq = IrqGuard::new();
        sched::make_ready(Arc::clone(&task));
    }
    debug!("task: spawned {} ({}) priority {}", task.tid(), name, priority);
    Ok(TaskHandle { task })
}

/// 当前任务的句柄
pub fn current() -> TaskHandle {
    TaskHandle {
        task: sched::current_task(),
    }
}

/// 按 tid 查找任务
pub fn find(tid: Tid) -> Option<TaskHandle> {
    TASK_TABLE
        .lock()
        .get(&tid)
        .map(|task| TaskHandle { task: Arc::clone(task) })
}

/// 注册表中的任务数量
pub fn task_count() -> usize {
    TASK_TABLE.lock().len()
}
