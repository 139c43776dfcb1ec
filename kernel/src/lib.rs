//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! Tern 内核：任务调度与同步子系统
//!
//! 提供抢占式多任务的核心机制：任务的创建 / join / 强制终止、
//! 每 CPU 运行队列与优先级调度、等待队列、以及交接语义的阻塞式
//! 互斥锁。体系结构相关的能力收敛在 [`hal::Platform`] 边界上，
//! 栈与 TLS 的来源收敛在 [`mm::RegionProvider`] 边界上，由移植层
//! 在启动时安装。
//!
//! 启动顺序：
//!
//! 1. [`kernel_init`] 安装移植层与区域提供者、挂接时钟中断
//! 2. 每个 CPU 调用 [`sched::init_cpu`] 建立 idle 任务并把启动
//!    执行流收编为 boot 任务
//! 3. 之后即可 [`task::spawn`] 并开始调度

#![cfg_attr(not(any(test, feature = "hosted")), no_std)]

extern crate alloc;

pub mod config;
pub mod errno;
pub mod hal;
pub mod mm;
pub mod sched;
pub mod sync;
pub mod task;

pub use errno::KernelError;

use log::info;

/// 内核初始化（启动时调用一次，先于任何 CPU 的 `init_cpu`）
pub fn kernel_init(platform: &'static dyn hal::Platform, regions: &'static dyn mm::RegionProvider) {
    hal::install(platform);
    mm::install(regions);
    platform.register_tick_handler(sched::tick);
    info!("{} {} initialized", config::KERNEL_NAME, config::KERNEL_VERSION);
}

#[cfg(test)]
mod tests;
