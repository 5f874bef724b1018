//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use clap::{Parser, ValueEnum};
use log::LevelFilter;
use std::path::PathBuf;

/// Probe Vitals - 网络端点与命令健康探测服务
#[derive(Parser, Debug, Clone)]
#[command(
    name = "probe-vitals",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 配置文件路径
    #[arg(
        short,
        long,
        value_name = "FILE",
        default_value = "probe-vitals.toml",
        env = "PROBE_VITALS_CONFIG"
    )]
    pub config: PathBuf,

    /// 日志级别，覆盖配置文件中的设置
    #[arg(short, long, value_enum, env = "PROBE_VITALS_LOG_LEVEL")]
    pub log_level: Option<LogLevel>,

    /// 只验证配置文件并退出
    #[arg(long)]
    pub check_config: bool,
}

/// 日志级别枚举
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}
