//! Tern 内核配置
//!
//! 集中存放调度与任务管理相关的编译期常量。

// ============================================================
// 基本信息
// ============================================================

/// 内核名称
pub const KERNEL_NAME: &str = "Tern";

/// 内核版本
pub const KERNEL_VERSION: &str = "0.1.0";

// ============================================================
// CPU 配置
// ============================================================

/// 最大 CPU 数量
///
/// 每个 CPU 拥有自己的运行队列与 idle 任务；
/// 本核心不做跨 CPU 负载均衡。
pub const MAX_CPUS: usize = 32;

// ============================================================
// 调度配置
// ============================================================

/// 时钟频率（每秒时钟中断次数，与 Linux 的 CONFIG_HZ 对应）
pub const HZ: u32 = 100;

/// 默认时间片（以时钟中断为单位，10 tick = 100ms @ HZ=100）
pub const DEFAULT_TIME_SLICE: u32 = 10;

/// 优先级数量（0 最紧急，数值越大越不紧急）
pub const NUM_PRIORITIES: u8 = 32;

/// 普通任务默认优先级
pub const DEFAULT_PRIORITY: u8 = 16;

/// idle 任务优先级（最低）
pub const IDLE_PRIORITY: u8 = NUM_PRIORITIES - 1;

// ============================================================
// 内存配置
// ============================================================

/// 默认内核栈大小（16KB，与 Linux 的 THREAD_SIZE 一致）
pub const DEFAULT_STACK_SIZE: usize = 16 * 1024;

/// 每任务线程本地存储区大小
pub const TLS_AREA_SIZE: usize = 4096;

/// 区域分配对齐
pub const REGION_ALIGN: usize = 16;
