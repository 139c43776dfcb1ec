//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 内核错误代码定义
//!
//! 错误分类遵循 Linux 的 errno 约定 (include/uapi/asm-generic/errno-base.h)：
//! 数值与对应的 errno 保持一致，便于上层系统调用直接转换。
//!
//! 本子系统只会同步地报告三类错误：
//! - `OutOfMemory`：spawn 时区域分配器耗尽，不自动重试
//! - `InvalidHandle`：对不可 join 的任务（idle / boot）执行 join 或 kill
//! - `AlreadyJoined`：同一任务被 join 两次（使用错误）
//!
//! 锁获取永远不会失败（只会阻塞）；临界区内部的不变量破坏属于致命错误，
//! 通过 panic 终止整个内核，而不是向调用者返回错误。

/// 内核错误代码
///
/// 数值对应 Linux errno：
/// - OutOfMemory = ENOMEM (12)
/// - InvalidHandle = ESRCH (3)
/// - AlreadyJoined = EINVAL (22)
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// 区域分配器耗尽 (ENOMEM)
    OutOfMemory = 12,

    /// 句柄无效：目标任务不可被 join / kill (ESRCH)
    InvalidHandle = 3,

    /// 任务已经被 join 过一次 (EINVAL)
    AlreadyJoined = 22,
}

impl KernelError {
    /// 获取错误代码的正数值（用于比较）
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// 获取错误代码的负数值（系统调用返回风格）
    #[inline]
    pub const fn as_neg_i32(self) -> i32 {
        -(self as i32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_values() {
        assert_eq!(KernelError::OutOfMemory.as_i32(), 12);
        assert_eq!(KernelError::InvalidHandle.as_i32(), 3);
        assert_eq!(KernelError::AlreadyJoined.as_i32(), 22);
    }

    #[test]
    fn test_errno_negative() {
        assert_eq!(KernelError::OutOfMemory.as_neg_i32(), -12);
        assert_eq!(KernelError::AlreadyJoined.as_neg_i32(), -22);
    }
}
