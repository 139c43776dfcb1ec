//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! join 场景测试

use super::with_kernel;
use crate::errno::KernelError;
use crate::sched;
use crate::task::{self, TaskState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[test]
fn test_join_returns_exit_code() {
    let _k = with_kernel();
    let handle = task::spawn("answer", || 42).unwrap();
    assert_eq!(handle.join().unwrap(), 42);
    assert_eq!(handle.state(), TaskState::Exited);
}

#[test]
fn test_join_blocks_until_child_exits() {
    let _k = with_kernel();
    let done = Arc::new(AtomicBool::new(false));
    let d = Arc::clone(&done);
    let handle = task::spawn("slowpoke", move || {
        for _ in 0..3 {
            sched::yield_now();
        }
        d.store(true, Ordering::SeqCst);
        7
    })
    .unwrap();

    assert_eq!(handle.join().unwrap(), 7);
    assert!(done.load(Ordering::SeqCst));
}

#[test]
fn test_join_is_allowed_once() {
    let _k = with_kernel();
    let handle = task::spawn("once", || 3).unwrap();
    let other = handle.clone();
    assert_eq!(handle.join().unwrap(), 3);
    assert_eq!(other.join(), Err(KernelError::AlreadyJoined));
}

#[test]
fn test_join_boot_task_rejected() {
    let _k = with_kernel();
    assert_eq!(task::current().join(), Err(KernelError::InvalidHandle));
}

#[test]
fn test_self_join_rejected() {
    let _k = with_kernel();
    let handle = task::spawn("narcissus", || {
        match task::current().join() {
            Err(KernelError::InvalidHandle) => 0,
            _ => 1,
        }
    })
    .unwrap();
    assert_eq!(handle.join().unwrap(), 0);
}

#[test]
fn test_exited_task_stays_until_joined() {
    let _k = with_kernel();
    let handle = task::spawn("zombie", || 11).unwrap();
    sched::yield_now();
    // 已退出但未 join：退出码必须还取得到
    assert_eq!(handle.state(), TaskState::Exited);
    assert!(task::find(handle.tid()).is_some());
    assert_eq!(handle.join().unwrap(), 11);
    assert!(task::find(handle.tid()).is_none());
}
