//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 任务标识符分配

use crate::task::task::Tid;
use core::sync::atomic::{AtomicU32, Ordering};

/// 从 1 开始单调递增，0 保留为非法值
static NEXT_TID: AtomicU32 = AtomicU32::new(1);

/// 分配一个新的任务标识符
pub fn alloc_tid() -> Tid {
    NEXT_TID.fetch_add(1, Ordering::Relaxed)
}
