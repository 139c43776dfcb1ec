//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 硬件抽象层 (HAL)
//!
//! 调度核心不直接操作寄存器，所有与体系结构相关的能力都收敛到
//! [`Platform`] trait 上，由具体移植层在内核启动时安装一次：
//!
//! - 上下文的创建 / 切换 / 销毁（对应 arch 层的 context_switch）
//! - TLS 指针的切换（调度时随任务一起换入）
//! - 中断开关（调度器临界区必须关中断，短且有界）
//! - 时钟中断回调注册（移植层周期性调用注册的 tick 处理函数）
//!
//! 上下文切换原语只允许在调度器的临界区内调用，绝不向上层暴露。

use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Once;

/// 上下文槽位
///
/// 每个任务持有一个槽位，内容对调度核心完全不透明：
/// 移植层在 `context_init` / `context_adopt` 时写入自己的令牌
/// （真实硬件上通常是寄存器保存区指针，宿主移植层是线程句柄）。
pub struct ContextSlot(AtomicUsize);

impl ContextSlot {
    pub const fn new() -> Self {
        Self(AtomicUsize::new(0))
    }

    /// 移植层写入令牌
    pub fn set_token(&self, token: usize) {
        self.0.store(token, Ordering::Release);
    }

    /// 移植层读取令牌
    pub fn token(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// 槽位是否已被移植层初始化
    pub fn is_initialized(&self) -> bool {
        self.token() != 0
    }
}

/// 平台移植接口
///
/// 所有方法都必须可以在关中断的临界区内安全调用。
pub trait Platform: Sync {
    /// 初始化一个新的执行上下文
    ///
    /// 首次切换到该上下文时，从 `entry(arg)` 开始执行；
    /// `stack_top` 是任务内核栈的栈顶地址（栈向下增长）。
    ///
    /// 切换原语总是在关中断下调用，移植层必须保证首次进入
    /// `entry` 时中断已经打开（ret_from_fork 风格的首次返回路径），
    /// 否则新任务永远收不到时钟中断。
    fn context_init(&self, slot: &ContextSlot, stack_top: usize, entry: fn(usize) -> !, arg: usize);

    /// 把当前正在运行的执行流收编为一个上下文（boot 任务使用）
    fn context_adopt(&self, slot: &ContextSlot);

    /// 回收上下文占用的移植层资源
    ///
    /// 只会在任务 Exited 且最后一个引用被丢弃后调用一次。
    fn context_destroy(&self, slot: &ContextSlot);

    /// 上下文切换：保存当前执行流到 `save_into`，恢复 `restore_from`
    ///
    /// # Safety
    /// 只能由调度器在关中断、且不持有任何自旋锁的情况下调用；
    /// 两个槽位必须都已初始化。
    unsafe fn context_switch(&self, save_into: &ContextSlot, restore_from: &ContextSlot);

    /// 切换线程本地存储指针（随任务换入）
    fn set_tls_pointer(&self, tls: usize);

    /// 关中断，返回先前的中断状态
    fn irq_save(&self) -> usize;

    /// 恢复 `irq_save` 保存的中断状态
    fn irq_restore(&self, flags: usize);

    /// 等待下一次中断（idle 任务使用，真实硬件上是 wfi/hlt）
    fn wait_for_interrupt(&self);

    /// 当前 CPU 编号
    fn cpu_id(&self) -> usize;

    /// 注册时钟中断处理函数
    ///
    /// 移植层必须在被中断任务所在 CPU 的中断上下文中周期性调用它。
    fn register_tick_handler(&self, handler: fn());
}

static PLATFORM: Once<&'static dyn Platform> = Once::new();

/// 安装平台移植层（内核启动时调用一次，之后不可更换）
pub fn install(platform: &'static dyn Platform) {
    PLATFORM.call_once(|| platform);
}

/// 获取已安装的平台移植层
///
/// 未安装即访问属于启动顺序错误，直接视为致命错误。
pub fn platform() -> &'static dyn Platform {
    *PLATFORM.get().expect("hal: platform not installed")
}

/// 关中断守护（RAII）
///
/// 调度器所有临界区都通过它进入；离开作用域时恢复先前的中断状态，
/// 支持嵌套（内层恢复的是外层保存的标志）。
pub struct IrqGuard {
    flags: usize,
}

impl IrqGuard {
    pub fn new() -> Self {
        Self {
            flags: platform().irq_save(),
        }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        platform().irq_restore(self.flags);
    }
}

#[cfg(any(test, feature = "hosted"))]
pub mod hosted;
