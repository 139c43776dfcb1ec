//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 宿主移植层
//!
//! 在普通操作系统上用 std 线程模拟执行上下文，使调度核心的全部语义
//! （阻塞、唤醒、交接、抢占点）可以脱离真实硬件运行，主要服务于测试。
//!
//! 映射关系：
//! - 一个上下文 = 一个宿主线程 + 一个 (run 标志, 条件变量) 对
//! - `context_switch` = 置位目标上下文的 run 标志并通知，然后在自己的
//!   标志上等待；任意时刻每个模拟 CPU 上恰好有一个线程在运行
//! - 中断上下文 = 任何未绑定 CPU 的宿主线程（可直接调用 wake_one
//!   等唤醒操作）；时钟 tick 只能由被中断 CPU 自己的线程触发，
//!   与真实硬件上时钟中断落在被中断 CPU 上一致
//! - `irq_save` / `irq_restore` = 空操作；宿主环境没有可屏蔽中断，
//!   队列原子性完全由自旋锁保证
//!
//! 已退出任务的宿主线程会永远停在自己的条件变量上，随进程退出回收。

use super::{ContextSlot, Platform};
use crate::config::MAX_CPUS;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::cell::Cell;
use std::sync::{Arc, Condvar, Mutex};

/// 单个模拟上下文的同步状态
struct HostContext {
    /// 为 true 时表示该上下文被允许运行
    run: Mutex<bool>,
    resumed: Condvar,
}

impl HostContext {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            run: Mutex::new(false),
            resumed: Condvar::new(),
        })
    }

    /// 阻塞直到被切换回来
    fn wait_resumed(&self) {
        let mut run = match self.run.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !*run {
            run = match self.resumed.wait(run) {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
        *run = false;
    }

    /// 允许该上下文运行
    fn resume(&self) {
        let mut run = match self.run.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *run = true;
        self.resumed.notify_one();
    }
}

std::thread_local! {
    /// 当前宿主线程绑定的模拟 CPU 编号（未绑定 = 中断上下文）
    static CPU_ID: Cell<Option<usize>> = const { Cell::new(None) };

    /// 当前模拟 CPU 的 TLS 指针
    static TLS_PTR: Cell<usize> = const { Cell::new(0) };
}

/// 宿主平台
pub struct HostPlatform {
    next_cpu: AtomicUsize,
    tick_handler: spin::Mutex<Option<fn()>>,
}

/// 全局宿主平台实例
pub static HOST_PLATFORM: HostPlatform = HostPlatform {
    next_cpu: AtomicUsize::new(0),
    tick_handler: spin::Mutex::new(None),
};

impl HostPlatform {
    /// 把调用线程绑定为一个新的模拟 CPU，返回 CPU 编号
    ///
    /// 每个模拟 CPU 只能绑定一次，编号用尽即为致命错误。
    pub fn bind_new_cpu(&self) -> usize {
        let cpu = self.next_cpu.fetch_add(1, Ordering::SeqCst);
        assert!(cpu < MAX_CPUS, "hosted: out of simulated cpus");
        CPU_ID.with(|c| c.set(Some(cpu)));
        cpu
    }

    /// 触发一次时钟中断（调用已注册的 tick 处理函数）
    pub fn fire_tick(&self) {
        let handler = *self.tick_handler.lock();
        if let Some(handler) = handler {
            handler();
        }
    }

    /// 当前模拟 CPU 的 TLS 指针（供测试观察换入效果）
    pub fn tls_pointer(&self) -> usize {
        TLS_PTR.with(|t| t.get())
    }

    fn ctx(slot: &ContextSlot) -> &HostContext {
        let token = slot.token();
        assert!(token != 0, "hosted: context slot not initialized");
        // 令牌是 Arc::into_raw 的指针，槽位持有一份引用直到 context_destroy
        unsafe { &*(token as *const HostContext) }
    }
}

impl Platform for HostPlatform {
    fn context_init(&self, slot: &ContextSlot, _stack_top: usize, entry: fn(usize) -> !, arg: usize) {
        let ctx = HostContext::new();
        let thread_ctx = Arc::clone(&ctx);
        let cpu = CPU_ID.with(|c| c.get());

        // 上下文线程继承创建者的模拟 CPU，先停在条件变量上等待首次换入
        std::thread::Builder::new()
            .name(format!("tern-ctx-{:p}", Arc::as_ptr(&ctx)))
            .spawn(move || {
                CPU_ID.with(|c| c.set(cpu));
                thread_ctx.wait_resumed();
                entry(arg);
            })
            .expect("hosted: failed to spawn context thread");

        slot.set_token(Arc::into_raw(ctx) as usize);
    }

    fn context_adopt(&self, slot: &ContextSlot) {
        // 当前线程正在运行，run 标志保持 false，切走时才会等待
        let ctx = HostContext::new();
        slot.set_token(Arc::into_raw(ctx) as usize);
    }

    fn context_destroy(&self, slot: &ContextSlot) {
        let token = slot.token();
        if token != 0 {
            slot.set_token(0);
            // 归还槽位持有的引用；已停住的上下文线程还握着自己的一份
            unsafe { drop(Arc::from_raw(token as *const HostContext)) };
        }
    }

    unsafe fn context_switch(&self, save_into: &ContextSlot, restore_from: &ContextSlot) {
        let save = Self::ctx(save_into);
        let restore = Self::ctx(restore_from);
        restore.resume();
        save.wait_resumed();
    }

    fn set_tls_pointer(&self, tls: usize) {
        TLS_PTR.with(|t| t.set(tls));
    }

    fn irq_save(&self) -> usize {
        0
    }

    fn irq_restore(&self, _flags: usize) {}

    fn wait_for_interrupt(&self) {
        std::thread::sleep(std::time::Duration::from_micros(200));
    }

    fn cpu_id(&self) -> usize {
        CPU_ID.with(|c| c.get()).expect("hosted: thread not bound to a cpu")
    }

    fn register_tick_handler(&self, handler: fn()) {
        *self.tick_handler.lock() = Some(handler);
    }
}
