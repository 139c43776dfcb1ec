//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 互斥锁场景测试

use super::with_kernel;
use crate::sched;
use crate::sync::Mutex;
use crate::task;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn test_mutual_exclusion_under_contention() {
    let _k = with_kernel();
    let counter = Arc::new(Mutex::new(0u32));
    let inside = Arc::new(AtomicBool::new(false));
    let violations = Arc::new(AtomicUsize::new(0));

    let worker = || {
        let counter = Arc::clone(&counter);
        let inside = Arc::clone(&inside);
        let violations = Arc::clone(&violations);
        move || {
            for _ in 0..10 {
                let mut guard = counter.lock();
                if inside.swap(true, Ordering::SeqCst) {
                    violations.fetch_add(1, Ordering::SeqCst);
                }
                *guard += 1;
                // 持锁让出，逼出临界区重叠
                sched::yield_now();
                inside.store(false, Ordering::SeqCst);
                drop(guard);
                sched::yield_now();
            }
            0
        }
    };
    let a = task::spawn("worker-a", worker()).unwrap();
    let b = task::spawn("worker-b", worker()).unwrap();
    a.join().unwrap();
    b.join().unwrap();

    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert_eq!(*counter.lock(), 20);
}

#[test]
fn test_try_lock_is_non_blocking_and_non_reentrant() {
    let _k = with_kernel();
    let m = Arc::new(Mutex::new(5u32));

    let guard = m.lock();
    // 同一任务重复上锁不可重入
    assert!(m.try_lock().is_none());

    let seen = Arc::new(AtomicBool::new(false));
    let probe = {
        let m = Arc::clone(&m);
        let seen = Arc::clone(&seen);
        task::spawn("probe", move || {
            seen.store(m.try_lock().is_some(), Ordering::SeqCst);
            0
        })
        .unwrap()
    };
    sched::yield_now();
    assert_eq!(probe.join().unwrap(), 0);
    assert!(!seen.load(Ordering::SeqCst));

    drop(guard);
    assert_eq!(*m.try_lock().unwrap(), 5);
}

#[test]
fn test_waiters_acquire_in_fifo_order() {
    let _k = with_kernel();
    let m = Arc::new(Mutex::new(()));
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let guard = m.lock();
    let contender = |tag: &'static str| {
        let m = Arc::clone(&m);
        let order = Arc::clone(&order);
        move || {
            let _g = m.lock();
            order.lock().unwrap().push(tag);
            0
        }
    };
    // 每创建一个就让它跑到阻塞点，等待队列次序即到达次序
    let a = task::spawn("a", contender("a")).unwrap();
    sched::yield_now();
    let b = task::spawn("b", contender("b")).unwrap();
    sched::yield_now();
    let c = task::spawn("c", contender("c")).unwrap();
    sched::yield_now();

    drop(guard);
    a.join().unwrap();
    b.join().unwrap();
    c.join().unwrap();
    assert_eq!(*order.lock().unwrap(), ["a", "b", "c"]);
}

#[test]
fn test_release_hands_off_without_unlocked_window() {
    let _k = with_kernel();
    let m = Arc::new(Mutex::new(0u32));

    let guard = m.lock();
    let waiter = {
        let m = Arc::clone(&m);
        task::spawn("waiter", move || {
            let mut g = m.lock();
            *g = 9;
            0
        })
        .unwrap()
    };
    sched::yield_now();

    // 释放瞬间所有权已移交给队首等待者，旁观者插不进来
    drop(guard);
    assert!(m.try_lock().is_none());

    waiter.join().unwrap();
    assert_eq!(*m.lock(), 9);
}
