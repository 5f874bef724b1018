//! 探测公共模型
//!
//! 定义探测种类共享的基础配置、来源标签、结果类型和能力集trait。
//! 各个具体种类（DNS/TCP/TLS/HTTP/命令）在子模块中实现。

pub mod command;
pub mod dns;
pub mod http;
pub mod tcp;
pub mod tls;
pub mod worker;

use crate::error::{CheckError, ProbeError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 周期性探测允许的最小间隔
pub const MIN_INTERVAL: Duration = Duration::from_secs(2);

/// 探测来源标签
///
/// 记录探测由谁创建，批量调和时按来源圈定范围。`OneOff`只会出现在
/// 一次性执行的结果上，不是合法的探测来源。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Source {
    /// 来自配置文件
    File,
    /// 来自控制面API
    Api,
    /// 来自服务发现
    Discovery,
    /// 一次性执行（仅用于结果）
    OneOff,
}

impl Default for Source {
    fn default() -> Self {
        Source::File
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::File => write!(f, "file"),
            Source::Api => write!(f, "api"),
            Source::Discovery => write!(f, "discovery"),
            Source::OneOff => write!(f, "one-off"),
        }
    }
}

/// Duration序列化模块，人类可读格式（"5s"、"1m30s"）
pub mod duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        humantime::format_duration(*duration)
            .to_string()
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(serde::de::Error::custom)
    }

    /// Option<Duration>变体
    pub mod option {
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(
            duration: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            duration
                .map(|d| humantime::format_duration(d).to_string())
                .serialize(serializer)
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            match Option::<String>::deserialize(deserializer)? {
                Some(text) => humantime::parse_duration(&text)
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

/// 探测基础配置，所有种类共享
///
/// 各种类的配置结构在线上格式里平铺同名字段（以便拒绝未知字段），
/// 构造探测时折叠成本结构供注册中心和驱动使用。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BaseConfig {
    /// 探测名称，注册中心内的主键
    pub name: String,
    /// 探测描述
    #[serde(default)]
    pub description: Option<String>,
    /// 周期执行间隔（一次性探测忽略该字段）
    #[serde(default, with = "duration")]
    pub interval: Duration,
    /// 是否为一次性探测
    #[serde(default)]
    pub one_off: bool,
    /// 来源标签
    #[serde(default)]
    pub source: Source,
}

impl BaseConfig {
    /// 验证基础配置
    ///
    /// 种类特有的超时校验（非零、不大于间隔）由各种类的validate完成。
    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.name.trim().is_empty() {
            return Err(ProbeError::InvalidConfig(
                "the probe name is missing".to_string(),
            ));
        }
        if self.source == Source::OneOff {
            return Err(ProbeError::InvalidConfig(
                "the source one-off is reserved for one-off results".to_string(),
            ));
        }
        if !self.one_off && self.interval < MIN_INTERVAL {
            return Err(ProbeError::InvalidConfig(
                "the probe interval should be greater than 2 seconds".to_string(),
            ));
        }
        Ok(())
    }

    /// 针对带超时的种类，验证超时与间隔的关系
    pub fn validate_timeout(&self, timeout: Duration) -> Result<(), ProbeError> {
        if timeout.is_zero() {
            return Err(ProbeError::InvalidConfig(
                "the probe timeout is missing".to_string(),
            ));
        }
        if !self.one_off && self.interval < timeout {
            return Err(ProbeError::InvalidConfig(
                "the probe interval should be greater than the timeout".to_string(),
            ));
        }
        Ok(())
    }
}

/// 单次探测执行的结果
///
/// 结果一经产生即不可变；核心不保留结果，统一发送到共享通道由
/// 外部消费者处理。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    /// 产生结果的探测名称
    pub name: String,
    /// 执行是否成功
    pub success: bool,
    /// 结果产生时刻
    pub timestamp: DateTime<Utc>,
    /// 执行耗时（秒）
    pub duration: f64,
    /// 成功为"success"，失败为具体原因
    pub message: String,
    /// 探测的来源标签，一次性执行为"one-off"
    pub source: String,
}

impl ProbeResult {
    /// 根据一次执行的产出构造结果
    ///
    /// # 参数
    /// * `probe` - 产生结果的探测
    /// * `duration` - 执行耗时（秒）
    /// * `err` - 执行错误，None表示成功
    pub fn new(probe: &dyn Probe, duration: f64, err: Option<&CheckError>) -> Self {
        let (success, message) = match err {
            Some(e) => (false, e.to_string()),
            None => (true, "success".to_string()),
        };
        Self {
            name: probe.name().to_string(),
            success,
            timestamp: Utc::now(),
            duration,
            message,
            source: probe.base().source.to_string(),
        }
    }
}

/// 拼装host:port形式的目标地址，IPv6主机加方括号
pub(crate) fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// 探测能力集trait
///
/// 注册中心对所有种类一视同仁。周期驱动（Start/Stop）不在trait上：
/// 驱动逻辑对所有种类相同，由[`worker::ProbeWorker`]统一实现，
/// 注册中心持有的常驻探测即worker。
#[async_trait]
pub trait Probe: Send + Sync {
    /// 返回探测名称
    fn name(&self) -> &str;

    /// 返回基础配置
    fn base(&self) -> &BaseConfig;

    /// 覆盖来源标签
    fn set_source(&mut self, source: Source);

    /// 单次执行的超时上限，驱动以它为界构造取消范围
    fn timeout(&self) -> Duration;

    /// 种类标签，用于日志
    fn kind(&self) -> &'static str;

    /// 人类可读的探测摘要
    fn summary(&self) -> String;

    /// 种类相关的一次性准备工作（地址拼装、正则编译等）
    ///
    /// 在新实例上幂等。失败是致命的，探测不得被启动。
    async fn initialize(&mut self) -> Result<(), ProbeError>;

    /// 同步执行一次探测
    ///
    /// 成功返回Ok(())，失败返回的错误只会被采集进结果的message，
    /// 不会中断驱动循环。
    async fn execute(&self) -> Result<(), CheckError>;

    /// 导出完整配置，供控制面序列化
    fn spec(&self) -> serde_json::Value;
}
