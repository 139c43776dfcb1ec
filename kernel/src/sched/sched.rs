//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 调度器核心
//!
//! 每 CPU 一个运行队列（对应 Linux 的 runqueues，kernel/sched/core.c），
//! 队列按优先级有序，同优先级 FIFO 轮转。任务创建时固定归属一个 CPU，
//! 不做跨 CPU 迁移与负载均衡。
//!
//! 抢占模型是协作点上的延迟抢占：时钟中断只做记账并置位
//! need_resched，真正的切换发生在任务下一次经过 [`preempt_point`]、
//! 主动让出或阻塞时。调度器临界区内绝不发生切换。
//!
//! 回收是延迟的：任务 Exited 后它的栈在本次切换期间仍在使用，
//! 所以把最后的拥有性引用挂到本 CPU 的 reap 链上，等下一次进入
//! 调度器时在锁外丢弃（对应 Linux 的 finish_task_switch）。

use crate::config::{DEFAULT_PRIORITY, DEFAULT_STACK_SIZE, IDLE_PRIORITY, MAX_CPUS, TLS_AREA_SIZE};
use crate::hal::{self, ContextSlot, IrqGuard};
use crate::mm;
use crate::sched::tid::alloc_tid;
use crate::task::task::{Task, TaskFlags, TaskState};
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};
use log::{debug, trace};

/// 单个 CPU 的调度状态
struct CpuState {
    /// 就绪队列，按优先级有序，同优先级 FIFO
    run_queue: VecDeque<Arc<Task>>,
    /// 正在运行的任务
    current: Option<Arc<Task>>,
    /// 本 CPU 的 idle 任务，永不入就绪队列
    idle: Option<Arc<Task>>,
    /// 延迟抢占标志
    need_resched: bool,
    /// 已退出、等待在锁外丢弃最后引用的任务
    reap: Vec<Arc<Task>>,
    /// 上下文切换计数
    switches: u64,
    /// 派发 idle 的次数
    idle_dispatches: u64,
}

impl CpuState {
    fn new() -> Self {
        Self {
            run_queue: VecDeque::new(),
            current: None,
            idle: None,
            need_resched: false,
            reap: Vec::new(),
            switches: 0,
            idle_dispatches: 0,
        }
    }
}

const CPU_INIT: spin::Mutex<Option<CpuState>> = spin::Mutex::new(None);
static CPUS: [spin::Mutex<Option<CpuState>>; MAX_CPUS] = [CPU_INIT; MAX_CPUS];

/// 自启动以来的时钟中断计数
static JIFFIES: AtomicU64 = AtomicU64::new(0);

/// 定时睡眠的任务 (唤醒时刻, 任务)
static SLEEPERS: spin::Mutex<Vec<(u64, Arc<Task>)>> = spin::Mutex::new(Vec::new());

/// 调度统计
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedStats {
    /// 上下文切换次数
    pub switches: u64,
    /// 派发 idle 的次数
    pub idle_dispatches: u64,
}

/// 按优先级插入就绪队列：插到第一个更不紧急的任务之前，
/// 同优先级排在其后（FIFO 轮转）
fn priority_insert(queue: &mut VecDeque<Arc<Task>>, task: Arc<Task>) {
    let pos = queue
        .iter()
        .position(|t| t.priority() > task.priority())
        .unwrap_or(queue.len());
    queue.insert(pos, task);
}

/// 丢弃本 CPU reap 链上的引用（在锁外，可能归还栈与上下文）
fn reap_exited(cpu: usize) {
    let exited = {
        let mut slot = CPUS[cpu].lock();
        match slot.as_mut() {
            Some(cs) if !cs.reap.is_empty() => core::mem::take(&mut cs.reap),
            _ => return,
        }
    };
    for task in &exited {
        trace!("sched: reaping task {}", task.tid());
    }
    drop(exited);
}

/// 选取下一个任务并切换过去
///
/// 调用者必须已关中断。`requeue_prev` 为 true 表示主动让出
/// （当前任务回到就绪队列尾部同优先级位置），为 false 表示当前任务
/// 已自行进入 Blocked / Exited。
fn reschedule(requeue_prev: bool) {
    let platform = hal::platform();
    let cpu = platform.cpu_id();

    reap_exited(cpu);

    let (prev, next) = {
        let mut slot = CPUS[cpu].lock();
        let cs = slot.as_mut().expect("sched: cpu not initialized");
        let prev = cs.current.clone().expect("sched: no current task");

        match prev.state() {
            TaskState::Running if requeue_prev => {
                prev.set_state(TaskState::Ready);
                if !prev.is_idle() {
                    priority_insert(&mut cs.run_queue, Arc::clone(&prev));
                }
            }
            TaskState::Ready if !requeue_prev => {
                // 阻塞尚未完成就被别人唤醒：撤销这次切换，继续运行
                if let Some(pos) = cs.run_queue.iter().position(|t| Arc::ptr_eq(t, &prev)) {
                    let _ = cs.run_queue.remove(pos);
                }
                prev.set_state(TaskState::Running);
                return;
            }
            _ => {}
        }

        let next = match cs.run_queue.pop_front() {
            Some(task) => task,
            None => {
                cs.idle_dispatches += 1;
                Arc::clone(cs.idle.as_ref().expect("sched: cpu has no idle task"))
            }
        };

        if Arc::ptr_eq(&next, &prev) {
            next.set_state(TaskState::Running);
            cs.need_resched = false;
            return;
        }

        next.set_state(TaskState::Running);
        next.reset_time_slice();
        cs.current = Some(Arc::clone(&next));
        cs.need_resched = false;
        cs.switches += 1;

        if prev.state() == TaskState::Exited {
            cs.reap.push(Arc::clone(&prev));
        }

        (prev, next)
    };

    trace!("sched: cpu{} switch {} -> {}", cpu, prev.tid(), next.tid());
    platform.set_tls_pointer(next.tls_base());

    // 切换期间栈上不保留拥有性引用：prev 此刻必然由就绪队列、
    // 等待队列或 reap 链持有，next 由 cs.current 持有。否则阻塞后
    // 被终止的任务会被自己冻结的栈帧钉住，永远无法回收。
    let prev_ctx: *const ContextSlot = prev.context();
    let next_ctx: *const ContextSlot = next.context();
    drop(prev);
    drop(next);
    // 此处不再持有任何自旋锁，中断仍由调用者保持关闭
    unsafe { platform.context_switch(&*prev_ctx, &*next_ctx) };
}

/// 切换到下一个就绪任务（当前任务已自行离开 Running）
///
/// 调用者必须已关中断。
pub(crate) fn schedule() {
    reschedule(false);
}

/// 主动让出 CPU
///
/// 没有更紧急或同优先级的就绪任务时等价于空操作。
pub fn yield_now() {
    let _irq = IrqGuard::new();
    reschedule(true);
}

/// 把任务置为 Ready 并插入其所属 CPU 的就绪队列
///
/// 调用者必须已关中断。
pub(crate) fn make_ready(task: Arc<Task>) {
    task.set_state(TaskState::Ready);
    let mut slot = CPUS[task.cpu()].lock();
    let cs = slot.as_mut().expect("sched: cpu not initialized");
    priority_insert(&mut cs.run_queue, task);
    cs.need_resched = true;
}

/// 把任务从其所属 CPU 的就绪队列中摘除（强制终止路径）
pub(crate) fn remove_ready(task: &Arc<Task>) -> bool {
    let mut slot = CPUS[task.cpu()].lock();
    let cs = slot.as_mut().expect("sched: cpu not initialized");
    match cs.run_queue.iter().position(|t| Arc::ptr_eq(t, task)) {
        Some(pos) => {
            let _ = cs.run_queue.remove(pos);
            true
        }
        None => false,
    }
}

/// 把任务从睡眠队列中摘除（强制终止路径）
pub(crate) fn remove_sleeper(task: &Arc<Task>) -> bool {
    let mut sleepers = SLEEPERS.lock();
    let before = sleepers.len();
    sleepers.retain(|(_, t)| !Arc::ptr_eq(t, task));
    sleepers.len() != before
}

/// 当前 CPU 正在运行的任务
pub fn current_task() -> Arc<Task> {
    let _irq = IrqGuard::new();
    let cpu = hal::platform().cpu_id();
    let slot = CPUS[cpu].lock();
    let cs = slot.as_ref().expect("sched: cpu not initialized");
    Arc::clone(cs.current.as_ref().expect("sched: no current task"))
}

/// 延迟抢占标志是否已置位
pub fn need_resched() -> bool {
    let _irq = IrqGuard::new();
    let cpu = hal::platform().cpu_id();
    let slot = CPUS[cpu].lock();
    slot.as_ref().map_or(false, |cs| cs.need_resched)
}

/// 协作抢占点：若有待处理的抢占请求则让出 CPU
///
/// 长时间运行的内核路径应周期性经过这里。
pub fn preempt_point() {
    if need_resched() {
        yield_now();
    }
}

/// 时钟中断处理
///
/// 只做记账并置位 need_resched，绝不在这里切换上下文。
/// 必须在被中断 CPU 的中断上下文中调用（见 `Platform::register_tick_handler`）。
pub fn tick() {
    let _irq = IrqGuard::new();
    let now = JIFFIES.fetch_add(1, Ordering::SeqCst) + 1;

    let due: Vec<Arc<Task>> = {
        let mut sleepers = SLEEPERS.lock();
        let mut due = Vec::new();
        sleepers.retain(|(deadline, task)| {
            if *deadline <= now {
                due.push(Arc::clone(task));
                false
            } else {
                true
            }
        });
        due
    };
    for task in due {
        make_ready(task);
    }

    let cpu = hal::platform().cpu_id();
    let mut slot = CPUS[cpu].lock();
    if let Some(cs) = slot.as_mut() {
        if let Some(current) = &cs.current {
            if !current.is_idle() && current.tick_time_slice() {
                current.reset_time_slice();
                cs.need_resched = true;
            }
        }
    }
}

/// 自启动以来的时钟中断计数
pub fn jiffies() -> u64 {
    JIFFIES.load(Ordering::SeqCst)
}

/// 睡眠指定的 tick 数；0 等价于让出一次 CPU
pub fn sleep_ticks(ticks: u64) {
    if ticks == 0 {
        yield_now();
        return;
    }
    let _irq = IrqGuard::new();
    let current = current_task();
    let deadline = JIFFIES.load(Ordering::SeqCst) + ticks;
    {
        let mut sleepers = SLEEPERS.lock();
        current.set_state(TaskState::Blocked);
        sleepers.push((deadline, current));
    }
    reschedule(false);
}

/// 终止当前任务
///
/// 先按交接路径释放仍持有的互斥锁，然后写退出码、唤醒全部 join 者、
/// 切换到下一个任务。最后的拥有性引用由 reap 链在下次调度时丢弃。
pub fn exit_current(code: i32) -> ! {
    let _irq = IrqGuard::new();
    let current = current_task();
    debug!("sched: task {} exiting with code {}", current.tid(), code);

    for raw in current.take_held_locks() {
        // 持锁记录存在期间锁对象必然存活
        unsafe { (*raw).force_release(&current) };
    }

    current.set_exit_code(code);
    current.set_state(TaskState::Exited);
    current.join_queue().wake_all();
    // 垂死的栈帧不保留引用，最后的拥有性引用走 reap 链
    drop(current);
    reschedule(false);
    panic!("sched: exited task rescheduled");
}

/// idle 循环：让出一切可让出的，然后等待下一次中断
fn idle_main(_arg: usize) -> ! {
    loop {
        {
            let _irq = IrqGuard::new();
            reschedule(true);
        }
        hal::platform().wait_for_interrupt();
    }
}

/// 初始化当前 CPU 的调度状态
///
/// 创建本 CPU 的 idle 任务，并把当前执行流收编为 boot 任务。
/// 每个 CPU 在启动路径上恰好调用一次；重复初始化是致命错误。
pub fn init_cpu() {
    let platform = hal::platform();
    let cpu = platform.cpu_id();

    let stack = mm::provider()
        .allocate(DEFAULT_STACK_SIZE)
        .expect("sched: no memory for idle stack");
    let tls = mm::provider()
        .allocate(TLS_AREA_SIZE)
        .expect("sched: no memory for idle tls");
    let idle = Arc::new(Task::new(
        alloc_tid(),
        Some("idle"),
        IDLE_PRIORITY,
        cpu,
        TaskFlags::IDLE,
        Some(stack),
        Some(tls),
        None,
    ));
    platform.context_init(idle.context(), idle.stack_top(), idle_main, 0);

    let boot = Arc::new(Task::new(
        alloc_tid(),
        Some("boot"),
        DEFAULT_PRIORITY,
        cpu,
        TaskFlags::BOOT,
        None,
        None,
        None,
    ));
    boot.set_state(TaskState::Running);
    platform.context_adopt(boot.context());

    let mut slot = CPUS[cpu].lock();
    assert!(slot.is_none(), "sched: cpu{} already initialized", cpu);
    let mut cs = CpuState::new();
    cs.idle = Some(idle);
    cs.current = Some(boot);
    *slot = Some(cs);
    debug!("sched: cpu{} online", cpu);
}

/// 当前 CPU 的调度统计快照
pub fn stats() -> SchedStats {
    let _irq = IrqGuard::new();
    let cpu = hal::platform().cpu_id();
    let slot = CPUS[cpu].lock();
    match slot.as_ref() {
        Some(cs) => SchedStats {
            switches: cs.switches,
            idle_dispatches: cs.idle_dispatches,
        },
        None => SchedStats::default(),
    }
}
