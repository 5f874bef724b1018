//! Probe Vitals - 网络端点与命令健康探测服务
//!
//! 这是一个用Rust编写的健康探测服务，支持：
//! - DNS/TCP/TLS/HTTP/命令五种周期性探测
//! - 运行时通过HTTP控制面增删探测（单个或批量）
//! - 一次性同步探测执行
//! - 探测结果汇入共享通道，由内存存储消费
//! - 结构化日志记录

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod probe;
pub mod registry;
pub mod store;
pub mod web;

// 重新导出主要类型
pub use error::{CheckError, ConfigError, ProbeError, ProbeVitalsError};
pub use probe::{BaseConfig, Probe, ProbeResult, Source};
pub use registry::{execute_one_off, ProbeRegistry};
pub use store::MemoryStore;

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
