//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 强制终止场景测试

use super::with_kernel;
use crate::errno::KernelError;
use crate::mm::HEAP_REGIONS;
use crate::sched;
use crate::sync::Mutex;
use crate::task::{self, TaskState, WaitQueue, KILLED_EXIT_CODE};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[test]
fn test_kill_blocked_task_and_reclaim() {
    let _k = with_kernel();
    let baseline = HEAP_REGIONS.outstanding();
    let queue = Arc::new(WaitQueue::new());
    let resumed = Arc::new(AtomicBool::new(false));

    let handle = {
        let queue = Arc::clone(&queue);
        let resumed = Arc::clone(&resumed);
        task::spawn("victim", move || {
            queue.block_current();
            resumed.store(true, Ordering::SeqCst);
            0
        })
        .unwrap()
    };
    sched::yield_now();
    assert_eq!(queue.len(), 1);

    handle.kill().unwrap();
    assert!(queue.is_empty());
    assert_eq!(handle.state(), TaskState::Exited);
    // 对已退出任务重复 kill 是无害的
    assert_eq!(handle.clone().kill(), Ok(()));

    assert_eq!(handle.join().unwrap(), KILLED_EXIT_CODE);
    assert!(!resumed.load(Ordering::SeqCst));

    drop(handle);
    assert_eq!(HEAP_REGIONS.outstanding(), baseline);
}

#[test]
fn test_kill_ready_task_before_first_dispatch() {
    let _k = with_kernel();
    let baseline = HEAP_REGIONS.outstanding();
    let ran = Arc::new(AtomicBool::new(false));
    let r = Arc::clone(&ran);
    let handle = task::spawn("stillborn", move || {
        r.store(true, Ordering::SeqCst);
        0
    })
    .unwrap();

    handle.kill().unwrap();
    sched::yield_now();
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(handle.join().unwrap(), KILLED_EXIT_CODE);

    drop(handle);
    assert_eq!(HEAP_REGIONS.outstanding(), baseline);
}

#[test]
fn test_kill_lock_owner_hands_lock_to_waiter() {
    let _k = with_kernel();
    let m = Arc::new(Mutex::new(0u32));
    let queue = Arc::new(WaitQueue::new());

    let owner = {
        let m = Arc::clone(&m);
        let queue = Arc::clone(&queue);
        task::spawn("owner", move || {
            let _g = m.lock();
            queue.block_current();
            0
        })
        .unwrap()
    };
    sched::yield_now();
    assert!(m.try_lock().is_none());

    let got_lock = Arc::new(AtomicBool::new(false));
    let waiter = {
        let m = Arc::clone(&m);
        let got_lock = Arc::clone(&got_lock);
        task::spawn("waiter", move || {
            let _g = m.lock();
            got_lock.store(true, Ordering::SeqCst);
            0
        })
        .unwrap()
    };
    sched::yield_now();

    // 终止持有者：锁按交接路径直接移交给队首等待者
    owner.kill().unwrap();
    assert_eq!(waiter.join().unwrap(), 0);
    assert!(got_lock.load(Ordering::SeqCst));
    assert_eq!(owner.join().unwrap(), KILLED_EXIT_CODE);
}

#[test]
fn test_kill_lock_owner_with_empty_queue_frees_lock() {
    let _k = with_kernel();
    let m = Arc::new(Mutex::new(0u32));
    let queue = Arc::new(WaitQueue::new());

    let owner = {
        let m = Arc::clone(&m);
        let queue = Arc::clone(&queue);
        task::spawn("owner", move || {
            let _g = m.lock();
            queue.block_current();
            0
        })
        .unwrap()
    };
    sched::yield_now();
    assert!(m.try_lock().is_none());

    owner.kill().unwrap();
    assert!(m.try_lock().is_some());
    assert_eq!(owner.join().unwrap(), KILLED_EXIT_CODE);
}

#[test]
fn test_kill_self_exits_with_killed_code() {
    let _k = with_kernel();
    let handle = task::spawn("suicide", || {
        let _ = task::current().kill();
        // kill 自身不返回
        1
    })
    .unwrap();
    assert_eq!(handle.join().unwrap(), KILLED_EXIT_CODE);
}

#[test]
fn test_kill_boot_and_idle_rejected() {
    let _k = with_kernel();
    assert_eq!(task::current().kill(), Err(KernelError::InvalidHandle));
}

#[test]
fn test_kill_joiner_releases_join_claim() {
    let _k = with_kernel();
    let queue = Arc::new(WaitQueue::new());

    let target = {
        let queue = Arc::clone(&queue);
        task::spawn("target", move || {
            queue.block_current();
            7
        })
        .unwrap()
    };
    sched::yield_now();

    let joiner = {
        let target = target.clone();
        task::spawn("joiner", move || {
            let _ = target.join();
            0
        })
        .unwrap()
    };
    sched::yield_now();

    // join 者死在等待中：名额随之归还，目标仍可被 join 并回收
    joiner.kill().unwrap();
    queue.wake_one();
    assert_eq!(target.join().unwrap(), 7);
    assert!(task::find(target.tid()).is_none());
}

#[test]
fn test_kill_sleeping_task() {
    let _k = with_kernel();
    let woke = Arc::new(AtomicBool::new(false));
    let w = Arc::clone(&woke);
    let handle = task::spawn("dozer", move || {
        sched::sleep_ticks(1000);
        w.store(true, Ordering::SeqCst);
        0
    })
    .unwrap();
    sched::yield_now();
    assert_eq!(handle.state(), TaskState::Blocked);

    handle.kill().unwrap();
    assert_eq!(handle.join().unwrap(), KILLED_EXIT_CODE);
    assert!(!woke.load(Ordering::SeqCst));
}
