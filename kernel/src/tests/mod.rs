//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 场景测试
//!
//! 跑在宿主移植层上：每个测试把自己的线程绑定为一个新的模拟 CPU
//! 并初始化该 CPU 的调度状态，测试线程本身就是 boot 任务。
//! 全局状态（任务注册表、区域计数、jiffies）是共享的，所以场景
//! 测试用一把锁串行执行。

use crate::hal::hosted::HOST_PLATFORM;
use crate::mm::HEAP_REGIONS;
use crate::sched;
use std::sync::{Mutex, MutexGuard};

mod join;
mod kill;
mod mutex;

static TEST_LOCK: Mutex<()> = Mutex::new(());
static INIT: spin::Once<()> = spin::Once::new();

/// 串行化场景测试，并把当前线程变成一个新初始化的模拟 CPU
fn with_kernel() -> MutexGuard<'static, ()> {
    let guard = match TEST_LOCK.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    INIT.call_once(|| {
        crate::kernel_init(&HOST_PLATFORM, &HEAP_REGIONS);
    });
    HOST_PLATFORM.bind_new_cpu();
    sched::init_cpu();
    guard
}
