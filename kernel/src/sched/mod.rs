//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 调度子系统

mod sched;
pub mod tid;

pub use sched::{
    current_task, exit_current, init_cpu, jiffies, need_resched, preempt_point, sleep_ticks,
    stats, tick, yield_now, SchedStats,
};
pub(crate) use sched::{make_ready, remove_ready, remove_sleeper, schedule};
