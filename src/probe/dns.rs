//! DNS探测实现
//!
//! 解析配置的域名，至少返回一个地址即视为成功

use crate::error::{CheckError, ProbeError};
use crate::probe::{duration, BaseConfig, Probe, Source};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::time::timeout;
use tracing::debug;

/// 未显式配置超时时的上限
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// DNS探测配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DnsProbeConfig {
    /// 探测名称
    pub name: String,
    /// 探测描述
    #[serde(default)]
    pub description: Option<String>,
    /// 要解析的域名
    pub domain: String,
    /// 单次解析的超时时间。缺省时取5秒与间隔中较小者
    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
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

impl DnsProbeConfig {
    /// 验证配置
    pub fn validate(&self) -> Result<(), ProbeError> {
        let base = self.to_base();
        base.validate()?;
        if self.domain.is_empty() {
            return Err(ProbeError::InvalidConfig(
                "the probe domain is missing".to_string(),
            ));
        }
        if let Some(timeout) = self.timeout {
            base.validate_timeout(timeout)?;
        }
        Ok(())
    }

    /// 实际生效的超时时间
    fn effective_timeout(&self) -> Duration {
        match self.timeout {
            Some(timeout) => timeout,
            None if !self.one_off && self.interval < DEFAULT_TIMEOUT => self.interval,
            None => DEFAULT_TIMEOUT,
        }
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

/// DNS探测
pub struct DnsProbe {
    config: DnsProbeConfig,
    base: BaseConfig,
    timeout: Duration,
}

impl DnsProbe {
    /// 从配置创建DNS探测，配置无效时返回错误
    pub fn new(config: DnsProbeConfig) -> Result<Self, ProbeError> {
        config.validate()?;
        Ok(Self {
            base: config.to_base(),
            timeout: config.effective_timeout(),
            config,
        })
    }
}

#[async_trait]
impl Probe for DnsProbe {
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
        self.timeout
    }

    fn kind(&self) -> &'static str {
        "dns"
    }

    fn summary(&self) -> String {
        let endpoint = format!("dns {}", self.config.domain);
        match &self.config.description {
            Some(description) => format!("{description}, {endpoint}"),
            None => endpoint,
        }
    }

    async fn initialize(&mut self) -> Result<(), ProbeError> {
        Ok(())
    }

    async fn execute(&self) -> Result<(), CheckError> {
        debug!(name = %self.config.name, domain = %self.config.domain, "开始执行DNS探测");
        let mut addrs = timeout(
            self.timeout,
            lookup_host((self.config.domain.as_str(), 0u16)),
        )
        .await
        .map_err(|_| CheckError::Timeout(self.timeout))?
        .map_err(|e| {
            CheckError::Io(format!(
                "fail to lookup IP for domain {}: {}",
                self.config.domain, e
            ))
        })?;
        if addrs.next().is_none() {
            return Err(CheckError::Io(format!(
                "the domain {} did not resolve to any address",
                self.config.domain
            )));
        }
        Ok(())
    }

    fn spec(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }
}
