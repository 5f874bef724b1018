//! TCP探测实现
//!
//! 向目标地址发起TCP连接，连接建立后立即关闭

use crate::error::{CheckError, ProbeError};
use crate::probe::{duration, join_host_port, BaseConfig, Probe, Source};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// TCP探测配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TcpProbeConfig {
    /// 探测名称
    pub name: String,
    /// 探测描述
    #[serde(default)]
    pub description: Option<String>,
    /// 目标，可以是IP或域名
    pub target: String,
    /// 目标端口
    pub port: u16,
    /// 单次连接的超时时间
    #[serde(with = "duration")]
    pub timeout: Duration,
    /// 周期执行间隔
    #[serde(default, with = "duration")]
    pub interval: Duration,
    /// 是否为一次性探测
    #[serde(default)]
    pub one_off: bool,
    /// 来源标签
    #[serde(default)]
    pub source: Source,
}

impl TcpProbeConfig {
    /// 验证配置
    pub fn validate(&self) -> Result<(), ProbeError> {
        let base = self.to_base();
        base.validate()?;
        if self.target.is_empty() {
            return Err(ProbeError::InvalidConfig(
                "the probe target is missing".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ProbeError::InvalidConfig(
                "the probe port is missing".to_string(),
            ));
        }
        base.validate_timeout(self.timeout)?;
        Ok(())
    }

    fn to_base(&self) -> BaseConfig {
        BaseConfig {
            name: self.name.clone(),
            description: self.description.clone(),
            interval: self.interval,
            one_off: self.one_off,
            source: self.source,
        }
    }
}

/// TCP探测
#[derive(Debug)]
pub struct TcpProbe {
    config: TcpProbeConfig,
    base: BaseConfig,
    /// 初始化时拼装好的目标地址
    addr: String,
}

impl TcpProbe {
    /// 从配置创建TCP探测，配置无效时返回错误
    pub fn new(config: TcpProbeConfig) -> Result<Self, ProbeError> {
        config.validate()?;
        Ok(Self {
            base: config.to_base(),
            addr: String::new(),
            config,
        })
    }
}

#[async_trait]
impl Probe for TcpProbe {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn base(&self) -> &BaseConfig {
        &self.base
    }

    fn set_source(&mut self, source: Source) {
        self.config.source = source;
        self.base.source = source;
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    fn kind(&self) -> &'static str {
        "tcp"
    }

    fn summary(&self) -> String {
        let endpoint = format!("tcp {}:{}", self.config.target, self.config.port);
        match &self.config.description {
            Some(description) => format!("{description}, {endpoint}"),
            None => endpoint,
        }
    }

    async fn initialize(&mut self) -> Result<(), ProbeError> {
        self.addr = join_host_port(&self.config.target, self.config.port);
        Ok(())
    }

    async fn execute(&self) -> Result<(), CheckError> {
        debug!(
            name = %self.config.name,
            target = %self.config.target,
            port = self.config.port,
            "开始执行TCP探测"
        );
        let stream = timeout(self.config.timeout, TcpStream::connect(&self.addr))
            .await
            .map_err(|_| CheckError::Timeout(self.config.timeout))?
            .map_err(|e| {
                CheckError::Io(format!("TCP connection failed on {}: {}", self.addr, e))
            })?;
        drop(stream);
        Ok(())
    }

    fn spec(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }
}
