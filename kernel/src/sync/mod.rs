//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 同步原语

pub mod mutex;

pub use mutex::{Mutex, MutexGuard};
