//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 阻塞式互斥锁 (Mutex)
//!
//! 与自旋锁不同，拿不到锁的任务进入等待队列并让出 CPU。释放采用
//! 所有权交接（对应 Linux rt_mutex 的 hand-off 语义，
//! kernel/locking/rtmutex.c）：有等待者时锁绝不经过"无主"状态，
//! 所有权在释放者的临界区内直接移交给队首等待者。配合 FIFO 等待
//! 队列，等待者按到达次序获得锁，不会饿死。
//!
//! 获得锁会记入任务的持锁记录，任务被强制终止时据此逐个按同样的
//! 交接路径释放（见 `force_release`）。

use crate::hal::IrqGuard;
use crate::sched;
use crate::task::task::Task;
use crate::task::wait::WaitQueue;
use alloc::sync::Arc;
use core::cell::UnsafeCell;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

/// 互斥锁的所有权与等待队列，与受保护数据无关的部分
pub(crate) struct RawMutex {
    /// 当前持有者；锁空闲时为 None
    owner: spin::Mutex<Option<Arc<Task>>>,
    /// FIFO 等待队列
    waiters: WaitQueue,
}

impl RawMutex {
    pub(crate) const fn new() -> Self {
        Self {
            owner: spin::Mutex::new(None),
            waiters: WaitQueue::new(),
        }
    }

    /// 获得锁，必要时阻塞
    fn lock(&self) {
        let _irq = IrqGuard::new();
        let current = sched::current_task();
        {
            let mut owner = self.owner.lock();
            if owner.is_none() {
                current.note_lock_acquired(self as *const RawMutex);
                *owner = Some(current);
                return;
            }
            // 在持有者锁内入队，与释放方在同一把锁内的摘取配对；
            // 阻塞期间栈上不保留引用
            self.waiters.enqueue_blocked(current);
        }
        sched::schedule();
        // 交接语义：被唤醒即已是持有者
        debug_assert!({
            let owner = self.owner.lock();
            let me = sched::current_task();
            owner.as_ref().map_or(false, |o| Arc::ptr_eq(o, &me))
        });
    }

    /// 尝试获得锁，不阻塞
    fn try_lock(&self) -> bool {
        let _irq = IrqGuard::new();
        let current = sched::current_task();
        let mut owner = self.owner.lock();
        if owner.is_none() {
            *owner = Some(Arc::clone(&current));
            current.note_lock_acquired(self as *const RawMutex);
            true
        } else {
            false
        }
    }

    /// 释放锁：有等待者则直接交接，否则置为空闲
    fn unlock(&self) {
        let _irq = IrqGuard::new();
        let current = sched::current_task();
        let mut owner = self.owner.lock();
        debug_assert!(owner.as_ref().map_or(false, |o| Arc::ptr_eq(o, &current)));
        current.note_lock_released(self as *const RawMutex);
        self.pass_to_next(&mut owner);
    }

    /// 强制终止路径的释放：victim 的持锁记录已被整体取走，
    /// 这里只做所有权交接。调用者必须已关中断。
    pub(crate) fn force_release(&self, victim: &Arc<Task>) {
        let mut owner = self.owner.lock();
        if !owner.as_ref().map_or(false, |o| Arc::ptr_eq(o, victim)) {
            return;
        }
        self.pass_to_next(&mut owner);
    }

    fn pass_to_next(&self, owner: &mut Option<Arc<Task>>) {
        match self.waiters.take_one() {
            Some(next) => {
                next.note_lock_acquired(self as *const RawMutex);
                *owner = Some(Arc::clone(&next));
                sched::make_ready(next);
            }
            None => *owner = None,
        }
    }
}

/// 阻塞式互斥锁
pub struct Mutex<T: ?Sized> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

// 锁保证独占访问，数据可随锁跨任务共享
unsafe impl<T: ?Sized + Send> Send for Mutex<T> {}
unsafe impl<T: ?Sized + Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub const fn new(data: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(data),
        }
    }

    /// 消耗锁并取回数据
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> Mutex<T> {
    /// 获得锁，拿不到则阻塞直到轮到自己
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        }
    }

    /// 尝试获得锁，锁被占用时返回 None
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.raw.try_lock() {
            Some(MutexGuard {
                mutex: self,
                _not_send: PhantomData,
            })
        } else {
            None
        }
    }
}

/// 锁守护：存活期间独占数据，离开作用域时释放（可能直接交接）
pub struct MutexGuard<'a, T: ?Sized> {
    mutex: &'a Mutex<T>,
    /// 守护不得跨任务移动，释放必须发生在获得锁的任务上
    _not_send: PhantomData<*mut ()>,
}

impl<T: ?Sized> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T: ?Sized> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T: ?Sized> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}
