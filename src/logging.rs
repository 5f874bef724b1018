//! 日志系统模块
//!
//! 基于tracing-subscriber的结构化日志配置，桥接log门面

use crate::error::Result;
use anyhow::anyhow;
use log::LevelFilter;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

/// 日志配置结构
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别
    pub level: LevelFilter,
    /// 是否使用JSON格式
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            json_format: false,
        }
    }
}

/// 将配置文件中的级别字符串解析为LevelFilter
///
/// 未知字符串回落到info（配置验证会提前拒绝无效级别）。
pub fn level_filter_from_str(level: &str) -> LevelFilter {
    match level {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

/// 初始化日志系统
///
/// 环境变量RUST_LOG优先于配置的级别。进程内只能调用一次。
pub fn setup_logging(config: &LogConfig) -> Result<()> {
    LogTracer::init().map_err(|e| anyhow!("初始化log桥接失败: {e}"))?;

    let default_directive = config.level.to_string().to_lowercase();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    if config.json_format {
        registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow!("初始化日志订阅器失败: {e}"))?;
    } else {
        registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
            .map_err(|e| anyhow!("初始化日志订阅器失败: {e}"))?;
    }

    Ok(())
}
