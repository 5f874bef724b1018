//! HTTP探测实现
//!
//! 按配置组装请求并周期发送，校验响应状态码与可选的响应体正则

use crate::error::{CheckError, ProbeError};
use crate::probe::{duration, join_host_port, BaseConfig, Probe, Source};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// 支持的HTTP方法
const VALID_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "HEAD", "OPTIONS", "PATCH"];

/// 请求协议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HttpProtocol {
    Http,
    Https,
}

impl Default for HttpProtocol {
    fn default() -> Self {
        HttpProtocol::Http
    }
}

impl std::fmt::Display for HttpProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpProtocol::Http => write!(f, "http"),
            HttpProtocol::Https => write!(f, "https"),
        }
    }
}

/// HTTP探测配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct HttpProbeConfig {
    /// 探测名称
    pub name: String,
    /// 探测描述
    #[serde(default)]
    pub description: Option<String>,
    /// 目标，可以是IP或域名
    pub target: String,
    /// 目标端口
    pub port: u16,
    /// 请求协议
    #[serde(default)]
    pub protocol: HttpProtocol,
    /// 请求路径
    #[serde(default = "default_path")]
    pub path: String,
    /// HTTP方法
    #[serde(default = "default_method")]
    pub method: String,
    /// 额外的请求头
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// 请求体
    #[serde(default)]
    pub body: Option<String>,
    /// 视为成功的状态码集合
    pub valid_status: Vec<u16>,
    /// 响应体需要匹配的正则表达式
    #[serde(default)]
    pub body_regexp: Option<String>,
    /// 自定义CA证书路径
    #[serde(default)]
    pub cacert: Option<PathBuf>,
    /// 客户端证书路径（mTLS）
    #[serde(default)]
    pub cert: Option<PathBuf>,
    /// 客户端私钥路径（mTLS）
    #[serde(default)]
    pub key: Option<PathBuf>,
    /// 单次请求的超时时间
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

fn default_path() -> String {
    "/".to_string()
}

fn default_method() -> String {
    "GET".to_string()
}

impl HttpProbeConfig {
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
        if !VALID_METHODS.contains(&self.method.to_uppercase().as_str()) {
            return Err(ProbeError::InvalidConfig(format!(
                "the HTTP method {} is invalid",
                self.method
            )));
        }
        if self.valid_status.is_empty() {
            return Err(ProbeError::InvalidConfig(
                "the probe valid-status list is missing".to_string(),
            ));
        }
        for &status in &self.valid_status {
            if !(100..=599).contains(&status) {
                return Err(ProbeError::InvalidConfig(format!(
                    "the status code {status} is invalid"
                )));
            }
        }
        if self.cert.is_some() != self.key.is_some() {
            return Err(ProbeError::InvalidConfig(
                "the cert and the key should be configured together".to_string(),
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

/// HTTP探测
///
/// 请求的各个部件（URL、方法、请求头、正则、客户端）在初始化时
/// 准备好，执行路径上只做克隆和发送。
pub struct HttpProbe {
    config: HttpProbeConfig,
    base: BaseConfig,
    url: String,
    method: Method,
    headers: HeaderMap,
    body_regex: Option<Regex>,
    client: Option<Client>,
}

impl HttpProbe {
    /// 从配置创建HTTP探测，配置无效时返回错误
    pub fn new(config: HttpProbeConfig) -> Result<Self, ProbeError> {
        config.validate()?;
        Ok(Self {
            base: config.to_base(),
            url: String::new(),
            method: Method::GET,
            headers: HeaderMap::new(),
            body_regex: None,
            client: None,
            config,
        })
    }

    fn init_failure(&self, reason: impl Into<String>) -> ProbeError {
        ProbeError::InitFailure {
            name: self.config.name.clone(),
            reason: reason.into(),
        }
    }

    /// 构建带TLS材料的HTTP客户端
    async fn build_client(&self) -> Result<Client, ProbeError> {
        let mut builder = Client::builder().timeout(self.config.timeout);
        if let Some(cacert) = &self.config.cacert {
            let pem = tokio::fs::read(cacert)
                .await
                .map_err(|e| self.init_failure(format!("fail to read the CA certificate: {e}")))?;
            let certificate = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| self.init_failure(format!("fail to parse the CA certificate: {e}")))?;
            builder = builder.add_root_certificate(certificate);
        }
        if let (Some(cert), Some(key)) = (&self.config.cert, &self.config.key) {
            let mut pem = tokio::fs::read(cert)
                .await
                .map_err(|e| self.init_failure(format!("fail to read the client certificate: {e}")))?;
            let key_pem = tokio::fs::read(key)
                .await
                .map_err(|e| self.init_failure(format!("fail to read the client key: {e}")))?;
            pem.extend_from_slice(&key_pem);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| self.init_failure(format!("fail to build the client identity: {e}")))?;
            builder = builder.identity(identity);
        }
        builder
            .build()
            .map_err(|e| self.init_failure(format!("fail to build the HTTP client: {e}")))
    }
}

#[async_trait]
impl Probe for HttpProbe {
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
        "http"
    }

    fn summary(&self) -> String {
        let endpoint = format!(
            "http {} {}://{}:{}{}",
            self.config.method,
            self.config.protocol,
            self.config.target,
            self.config.port,
            self.config.path
        );
        match &self.config.description {
            Some(description) => format!("{description}, {endpoint}"),
            None => endpoint,
        }
    }

    async fn initialize(&mut self) -> Result<(), ProbeError> {
        self.url = format!(
            "{}://{}{}",
            self.config.protocol,
            join_host_port(&self.config.target, self.config.port),
            self.config.path
        );
        self.method = Method::from_str(&self.config.method.to_uppercase())
            .map_err(|_| self.init_failure(format!("the HTTP method {} is invalid", self.config.method)))?;

        let mut headers = HeaderMap::new();
        for (key, value) in &self.config.headers {
            let name = HeaderName::from_str(key)
                .map_err(|_| self.init_failure(format!("the header name {key} is invalid")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| self.init_failure(format!("the header value for {key} is invalid")))?;
            headers.insert(name, value);
        }
        self.headers = headers;

        self.body_regex = match &self.config.body_regexp {
            Some(pattern) => Some(Regex::new(pattern).map_err(|e| {
                self.init_failure(format!("fail to compile the body regexp: {e}"))
            })?),
            None => None,
        };

        self.client = Some(self.build_client().await?);
        Ok(())
    }

    async fn execute(&self) -> Result<(), CheckError> {
        debug!(name = %self.config.name, url = %self.url, "开始执行HTTP探测");
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| CheckError::Io("the probe is not initialized".to_string()))?;

        let mut request = client
            .request(self.method.clone(), self.url.as_str())
            .headers(self.headers.clone());
        if let Some(body) = &self.config.body {
            request = request.body(body.clone());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CheckError::Timeout(self.config.timeout)
            } else {
                CheckError::Io(format!("HTTP request failed on {}: {}", self.url, e))
            }
        })?;

        let status = response.status().as_u16();
        if !self.config.valid_status.contains(&status) {
            return Err(CheckError::Protocol(format!(
                "HTTP request failed on {}: invalid status code {}",
                self.url, status
            )));
        }

        if let Some(regex) = &self.body_regex {
            let body = response.text().await.map_err(|e| {
                CheckError::Io(format!(
                    "fail to read the response body on {}: {}",
                    self.url, e
                ))
            })?;
            if !regex.is_match(&body) {
                return Err(CheckError::Protocol(format!(
                    "HTTP request failed on {}: the body does not match the configured regexp",
                    self.url
                )));
            }
        }
        Ok(())
    }

    fn spec(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }
}
