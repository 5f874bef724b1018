//! 错误处理模块
//!
//! 定义应用程序的统一错误类型

use std::time::Duration;
use thiserror::Error;

/// Probe Vitals 应用程序的主要错误类型
#[derive(Error, Debug)]
pub enum ProbeVitalsError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 探测生命周期相关错误
    #[error("探测错误: {0}")]
    Probe(#[from] ProbeError),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 探测生命周期错误类型
///
/// 注册中心API对外暴露的错误都属于这一类。探测执行过程中的失败
/// （超时、IO等）不在此列，它们只会出现在结果的message字段中，
/// 见[`CheckError`]。
#[derive(Error, Debug)]
pub enum ProbeError {
    /// 探测配置无效
    #[error("invalid probe configuration: {0}")]
    InvalidConfig(String),

    /// 探测初始化失败
    #[error("fail to initialize the probe {name}: {reason}")]
    InitFailure { name: String, reason: String },

    /// 探测驱动任务启动失败
    #[error("fail to start the probe {name}: {reason}")]
    StartFailure { name: String, reason: String },

    /// 探测驱动任务停止失败
    #[error("fail to stop the probe {name}: {reason}")]
    StopFailure { name: String, reason: String },

    /// 注册中心已停止，拒绝一切变更操作
    #[error("the probe registry is stopped")]
    RegistryStopped,
}

/// 探测执行失败类型
///
/// 只出现在探测结果的message中，永远不会沿注册中心API向上传播。
#[derive(Error, Debug)]
pub enum CheckError {
    /// 执行超过了探测配置的超时时间
    #[error("the probe execution timed out after {0:?}")]
    Timeout(Duration),

    /// 网络或系统IO失败
    #[error("{0}")]
    Io(String),

    /// 协议层失败（握手、状态码、响应内容等）
    #[error("{0}")]
    Protocol(String),

    /// 子进程以非零状态退出
    #[error("{0}")]
    Exit(String),
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ProbeVitalsError>;
