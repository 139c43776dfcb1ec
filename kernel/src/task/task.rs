//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 任务控制块 (Task Control Block)
//!
//! 任务是调度的基本单位：自带内核栈与 TLS 区域、一个恰好执行一次的
//! 入口闭包、以及恰好写入一次的退出码。设计对应 Linux 的
//! `struct task_struct` (include/linux/sched.h)，按本内核的单地址空间
//! 模型裁剪。
//!
//! 所有权规则（避免环引用）：
//! - 任务表（task manager）与 join 者持有拥有性的 `Arc<Task>`
//! - 运行队列 / 等待队列中的引用只是调度簿记，随入队出队增减
//! - 栈与 TLS 在任务 Exited 且最后一个 `Arc` 被丢弃时恰好归还一次，
//!   由所有权不变量保证，不做运行时二次释放检查
//!
//! 不变量：任意时刻任务处于且仅处于一个位置——就绪队列、CPU 上运行、
//! 某一个等待队列、或已回收。

use crate::config::DEFAULT_TIME_SLICE;
use crate::hal::ContextSlot;
use crate::mm::Region;
use crate::sync::mutex::RawMutex;
use crate::task::wait::WaitQueue;
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicPtr, AtomicU32, AtomicU8, Ordering};

/// 任务标识符
pub type Tid = u32;

/// 任务入口闭包，返回退出码
pub type TaskEntry = Box<dyn FnOnce() -> i32 + Send + 'static>;

/// 任务状态
///
/// 状态机：Ready → Running →（Ready | Blocked | Exited）；
/// Blocked → Ready（被唤醒）；Exited 是终态，之后只剩回收。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TaskState {
    /// 在就绪队列中等待被调度
    Ready = 0,
    /// 正在 CPU 上运行
    Running = 1,
    /// 在某个等待队列（或睡眠队列）中阻塞
    Blocked = 2,
    /// 已退出，等待回收
    Exited = 3,
}

impl TaskState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => TaskState::Ready,
            1 => TaskState::Running,
            2 => TaskState::Blocked,
            3 => TaskState::Exited,
            _ => panic!("task: corrupted state {}", raw),
        }
    }
}

bitflags! {
    /// 任务标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskFlags: u32 {
        /// idle 任务：每 CPU 一个，永不入就绪队列，不可 join
        const IDLE   = 0x01;
        /// boot 任务：收编内核启动执行流而来，不可 join
        const BOOT   = 0x02;
        /// 被强制终止
        const KILLED = 0x04;
    }
}

/// 任务控制块
pub struct Task {
    tid: Tid,
    name: Option<&'static str>,
    /// 优先级序数，数值越小越紧急，创建后不变
    priority: u8,
    /// 任务所属 CPU（就绪队列归属），创建后不变
    cpu: usize,

    state: AtomicU8,
    flags: AtomicU32,

    /// 剩余时间片（tick 数）
    time_slice: AtomicU32,

    /// 平台上下文槽位
    ctx: ContextSlot,

    /// 独占的内核栈区域（boot 任务没有，收编的是移植层自己的栈）
    stack: Option<Region>,

    /// 独占的线程本地存储区域
    tls: Option<Region>,

    /// 入口闭包，首次被调度时由跳板取走，恰好一次
    entry: spin::Mutex<Option<TaskEntry>>,

    /// 退出码，进入 Exited 前恰好写入一次
    exit_code: AtomicI32,

    /// join 一次性标志
    joined: AtomicBool,

    /// 正在 join 的目标任务
    ///
    /// 本任务在 join 等待期间被强制终止时，据此归还目标的 join 名额。
    pending_join: spin::Mutex<Option<Arc<Task>>>,

    /// 私有单槽等待队列，join 者在此阻塞
    join_queue: WaitQueue,

    /// 当前阻塞所在的等待队列（强制终止时据此摘除）
    ///
    /// 只在关中断且持有对应队列锁的临界区内读写。
    waiting_on: AtomicPtr<WaitQueue>,

    /// 持有中的互斥锁（强制终止时逐个按交接路径释放）
    ///
    /// 裸指针只在关中断临界区内解引用，指向的锁必须比持有者活得久。
    held_locks: spin::Mutex<Vec<*const RawMutex>>,
}

// 裸指针字段只在上述纪律下访问，跨上下文共享是安全的
unsafe impl Send for Task {}
unsafe impl Sync for Task {}

impl Task {
    /// 创建任务控制块（不含上下文初始化与入队）
    pub(crate) fn new(
        tid: Tid,
        name: Option<&'static str>,
        priority: u8,
        cpu: usize,
        flags: TaskFlags,
        stack: Option<Region>,
        tls: Option<Region>,
        entry: Option<TaskEntry>,
    ) -> Self {
        Self {
            tid,
            name,
            priority,
            cpu,
            state: AtomicU8::new(TaskState::Ready as u8),
            flags: AtomicU32::new(flags.bits()),
            time_slice: AtomicU32::new(DEFAULT_TIME_SLICE),
            ctx: ContextSlot::new(),
            stack,
            tls,
            entry: spin::Mutex::new(entry),
            exit_code: AtomicI32::new(0),
            joined: AtomicBool::new(false),
            pending_join: spin::Mutex::new(None),
            join_queue: WaitQueue::new(),
            waiting_on: AtomicPtr::new(core::ptr::null_mut()),
            held_locks: spin::Mutex::new(Vec::new()),
        }
    }

    #[inline]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    #[inline]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    #[inline]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    #[inline]
    pub(crate) fn cpu(&self) -> usize {
        self.cpu
    }

    /// 读取任务状态
    #[inline]
    pub fn state(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// 写入任务状态
    #[inline]
    pub(crate) fn set_state(&self, state: TaskState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn flags(&self) -> TaskFlags {
        TaskFlags::from_bits_retain(self.flags.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_idle(&self) -> bool {
        self.flags().contains(TaskFlags::IDLE)
    }

    #[inline]
    pub fn is_boot(&self) -> bool {
        self.flags().contains(TaskFlags::BOOT)
    }

    /// 任务是否可被 join / kill
    #[inline]
    pub fn is_joinable(&self) -> bool {
        !self.flags().intersects(TaskFlags::IDLE | TaskFlags::BOOT)
    }

    #[inline]
    pub fn was_killed(&self) -> bool {
        self.flags().contains(TaskFlags::KILLED)
    }

    pub(crate) fn mark_killed(&self) {
        self.flags.fetch_or(TaskFlags::KILLED.bits(), Ordering::AcqRel);
    }

    /// 消耗一个 tick 的时间片，返回是否已耗尽
    pub(crate) fn tick_time_slice(&self) -> bool {
        let prev = self.time_slice.load(Ordering::Relaxed);
        if prev == 0 {
            return true;
        }
        self.time_slice.store(prev - 1, Ordering::Relaxed);
        prev == 1
    }

    /// 换入 CPU 时重置时间片
    pub(crate) fn reset_time_slice(&self) {
        self.time_slice.store(DEFAULT_TIME_SLICE, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn context(&self) -> &ContextSlot {
        &self.ctx
    }

    /// TLS 区域基址（boot 任务没有 TLS 区域，返回 0）
    pub(crate) fn tls_base(&self) -> usize {
        match &self.tls {
            Some(tls) => tls.base(),
            None => 0,
        }
    }

    /// 栈顶地址（栈向下增长）
    pub(crate) fn stack_top(&self) -> usize {
        match &self.stack {
            Some(stack) => stack.top(),
            None => 0,
        }
    }

    /// 取走入口闭包（跳板首次调度时调用，之后恒为 None）
    pub(crate) fn take_entry(&self) -> Option<TaskEntry> {
        self.entry.lock().take()
    }

    /// 写入退出码；必须先于状态切换到 Exited
    pub(crate) fn set_exit_code(&self, code: i32) {
        self.exit_code.store(code, Ordering::Release);
    }

    /// 退出码（仅在观察到 Exited 之后有效）
    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }

    /// 尝试占用一次性的 join 名额，返回是否成功
    pub(crate) fn try_claim_join(&self) -> bool {
        !self.joined.swap(true, Ordering::AcqRel)
    }

    /// 归还 join 名额（join 者在等待期间被强制终止时调用）
    pub(crate) fn release_join_claim(&self) {
        self.joined.store(false, Ordering::Release);
    }

    /// 记录 join 目标（等待期间有效）
    pub(crate) fn set_pending_join(&self, target: Arc<Task>) {
        *self.pending_join.lock() = Some(target);
    }

    /// 清除 join 目标（join 正常完成）
    pub(crate) fn clear_pending_join(&self) {
        *self.pending_join.lock() = None;
    }

    /// 取走 join 目标（强制终止路径）
    pub(crate) fn take_pending_join(&self) -> Option<Arc<Task>> {
        self.pending_join.lock().take()
    }

    #[inline]
    pub(crate) fn join_queue(&self) -> &WaitQueue {
        &self.join_queue
    }

    pub(crate) fn set_waiting_on(&self, queue: *const WaitQueue) {
        self.waiting_on.store(queue as *mut WaitQueue, Ordering::Release);
    }

    pub(crate) fn waiting_on(&self) -> *const WaitQueue {
        self.waiting_on.load(Ordering::Acquire)
    }

    /// 记录获得的互斥锁
    pub(crate) fn note_lock_acquired(&self, raw: *const RawMutex) {
        self.held_locks.lock().push(raw);
    }

    /// 移除已释放的互斥锁记录
    pub(crate) fn note_lock_released(&self, raw: *const RawMutex) {
        self.held_locks.lock().retain(|&p| p != raw);
    }

    /// 取走全部持锁记录（强制终止路径）
    pub(crate) fn take_held_locks(&self) -> Vec<*const RawMutex> {
        core::mem::take(&mut *self.held_locks.lock())
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        // 最后一个持有者离开：上下文与区域恰好回收一次
        if self.ctx.is_initialized() {
            crate::hal::platform().context_destroy(&self.ctx);
        }
        if let Some(stack) = self.stack.take() {
            crate::mm::provider().free(stack);
        }
        if let Some(tls) = self.tls.take() {
            crate::mm::provider().free(tls);
        }
    }
}

impl core::fmt::Debug for Task {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Task")
            .field("tid", &self.tid)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("state", &self.state())
            .finish()
    }
}
