//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 内存区域提供者
//!
//! 任务的内核栈与 TLS 区域都来自这里。调度核心只依赖 [`RegionProvider`]
//! 这一边界，由页/区域分配器在启动时安装具体实现；crate 自带一个基于
//! 全局堆的缺省实现（对应 Linux 的 alloc_thread_stack_node 路径），
//! 并维护未归还区域计数，方便验证“退出任务不泄漏栈/TLS”。

use crate::config::REGION_ALIGN;
use crate::errno::KernelError;
use alloc::alloc::{alloc_zeroed, dealloc};
use core::alloc::Layout;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Once;

/// 一块独占的原始内存区域（栈或 TLS）
///
/// Region 本身不负责释放，归还动作由持有它的 Task 在析构时
/// 通过 RegionProvider 完成，恰好一次。
pub struct Region {
    ptr: NonNull<u8>,
    size: usize,
}

// Region 代表独占所有权，跨上下文移动是安全的
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// 由提供者构造
    pub fn new(ptr: NonNull<u8>, size: usize) -> Self {
        Self { ptr, size }
    }

    /// 区域起始地址
    #[inline]
    pub fn base(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// 区域大小（字节）
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// 区域结束地址（栈向下增长，作为栈时这里是栈顶）
    #[inline]
    pub fn top(&self) -> usize {
        self.base() + self.size
    }
}

/// 区域提供者接口
pub trait RegionProvider: Sync {
    /// 分配一块 `size` 字节的区域，耗尽时返回 `OutOfMemory`
    fn allocate(&self, size: usize) -> Result<Region, KernelError>;

    /// 归还区域
    fn free(&self, region: Region);
}

static PROVIDER: Once<&'static dyn RegionProvider> = Once::new();

/// 安装区域提供者（内核启动时调用一次）
pub fn install(provider: &'static dyn RegionProvider) {
    PROVIDER.call_once(|| provider);
}

/// 获取已安装的区域提供者
pub fn provider() -> &'static dyn RegionProvider {
    *PROVIDER.get().expect("mm: region provider not installed")
}

/// 基于全局堆的缺省区域提供者
///
/// 分配时清零整块区域，并记录未归还的区域数量。
pub struct HeapRegionProvider {
    outstanding: AtomicUsize,
}

/// 全局缺省实例
pub static HEAP_REGIONS: HeapRegionProvider = HeapRegionProvider::new();

impl HeapRegionProvider {
    pub const fn new() -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
        }
    }

    /// 当前未归还的区域数量
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    fn layout(size: usize) -> Layout {
        // 对齐与大小都是编译期常量约束下的小值，构造失败属于致命错误
        Layout::from_size_align(size, REGION_ALIGN).expect("mm: bad region layout")
    }
}

impl RegionProvider for HeapRegionProvider {
    fn allocate(&self, size: usize) -> Result<Region, KernelError> {
        let layout = Self::layout(size);
        let ptr = unsafe { alloc_zeroed(layout) };
        match NonNull::new(ptr) {
            Some(ptr) => {
                self.outstanding.fetch_add(1, Ordering::SeqCst);
                Ok(Region::new(ptr, size))
            }
            None => Err(KernelError::OutOfMemory),
        }
    }

    fn free(&self, region: Region) {
        unsafe { dealloc(region.ptr.as_ptr(), Self::layout(region.size)) };
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}
