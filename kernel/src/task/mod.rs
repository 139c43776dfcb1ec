//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 任务子系统：任务控制块、等待队列与任务管理器

pub mod manager;
pub mod task;
pub mod wait;

pub use manager::{current, find, spawn, spawn_with, TaskHandle, KILLED_EXIT_CODE};
pub use task::{Task, TaskState, Tid};
pub use wait::{QueuePolicy, WaitQueue};
