//! TLS探测实现
//!
//! 建立TCP连接后执行TLS握手，按配置校验证书，可选检查证书过期窗口

use crate::error::{CheckError, ProbeError};
use crate::probe::{duration, join_host_port, BaseConfig, Probe, Source};
use async_trait::async_trait;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use x509_parser::prelude::*;

/// TLS探测配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct TlsProbeConfig {
    /// 探测名称
    pub name: String,
    /// 探测描述
    #[serde(default)]
    pub description: Option<String>,
    /// 目标，可以是IP或域名
    pub target: String,
    /// 目标端口
    pub port: u16,
    /// SNI名称，缺省使用target
    #[serde(default)]
    pub server_name: Option<String>,
    /// 自定义CA证书路径
    #[serde(default)]
    pub cacert: Option<PathBuf>,
    /// 客户端证书路径（mTLS）
    #[serde(default)]
    pub cert: Option<PathBuf>,
    /// 客户端私钥路径（mTLS）
    #[serde(default)]
    pub key: Option<PathBuf>,
    /// 对端证书距离过期不足该窗口时判定失败
    #[serde(default, with = "duration::option", skip_serializing_if = "Option::is_none")]
    pub expiration_delay: Option<Duration>,
    /// 单次握手的超时时间
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

impl TlsProbeConfig {
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

/// TLS探测
pub struct TlsProbe {
    config: TlsProbeConfig,
    base: BaseConfig,
    addr: String,
    server_name: Option<ServerName<'static>>,
    connector: Option<TlsConnector>,
}

impl TlsProbe {
    /// 从配置创建TLS探测，配置无效时返回错误
    pub fn new(config: TlsProbeConfig) -> Result<Self, ProbeError> {
        config.validate()?;
        Ok(Self {
            base: config.to_base(),
            addr: String::new(),
            server_name: None,
            connector: None,
            config,
        })
    }

    fn init_failure(&self, reason: impl Into<String>) -> ProbeError {
        ProbeError::InitFailure {
            name: self.config.name.clone(),
            reason: reason.into(),
        }
    }

    /// 构建客户端TLS配置：信任锚、可选的客户端身份
    fn build_client_config(&self) -> Result<ClientConfig, ProbeError> {
        let mut roots = RootCertStore::empty();
        match &self.config.cacert {
            Some(cacert) => {
                let certs = CertificateDer::pem_file_iter(cacert)
                    .map_err(|e| self.init_failure(format!("fail to read the CA certificate: {e}")))?;
                for cert in certs {
                    let cert = cert.map_err(|e| {
                        self.init_failure(format!("fail to parse the CA certificate: {e}"))
                    })?;
                    roots.add(cert).map_err(|e| {
                        self.init_failure(format!("fail to add the CA certificate: {e}"))
                    })?;
                }
            }
            None => {
                roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            }
        }

        let builder = ClientConfig::builder().with_root_certificates(roots);
        match (&self.config.cert, &self.config.key) {
            (Some(cert), Some(key)) => {
                let certs: Vec<CertificateDer<'static>> = CertificateDer::pem_file_iter(cert)
                    .map_err(|e| {
                        self.init_failure(format!("fail to read the client certificate: {e}"))
                    })?
                    .collect::<Result<_, _>>()
                    .map_err(|e| {
                        self.init_failure(format!("fail to parse the client certificate: {e}"))
                    })?;
                let key = PrivateKeyDer::from_pem_file(key)
                    .map_err(|e| self.init_failure(format!("fail to read the client key: {e}")))?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| self.init_failure(format!("fail to build the client identity: {e}")))
            }
            _ => Ok(builder.with_no_client_auth()),
        }
    }

    /// 建立TCP连接并完成TLS握手
    async fn dial(&self) -> Result<TlsStream<TcpStream>, CheckError> {
        let connector = self
            .connector
            .as_ref()
            .ok_or_else(|| CheckError::Io("the probe is not initialized".to_string()))?;
        let server_name = self
            .server_name
            .clone()
            .ok_or_else(|| CheckError::Io("the probe is not initialized".to_string()))?;

        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            CheckError::Io(format!("TCP connection failed on {}: {}", self.addr, e))
        })?;
        connector.connect(server_name, stream).await.map_err(|e| {
            CheckError::Protocol(format!("TLS handshake failed on {}: {}", self.addr, e))
        })
    }

    /// 校验对端证书的剩余有效期
    fn check_expiration(
        &self,
        stream: &TlsStream<TcpStream>,
        delay: Duration,
    ) -> Result<(), CheckError> {
        let (_, session) = stream.get_ref();
        let leaf = session
            .peer_certificates()
            .and_then(|certs| certs.first())
            .ok_or_else(|| {
                CheckError::Protocol(format!("no peer certificate presented by {}", self.addr))
            })?;
        self.check_certificate_expiration(leaf.as_ref(), delay)
    }

    /// 校验一张DER编码证书距离过期是否还有足够的窗口
    fn check_certificate_expiration(
        &self,
        leaf: &[u8],
        delay: Duration,
    ) -> Result<(), CheckError> {
        let (_, certificate) = X509Certificate::from_der(leaf).map_err(|e| {
            CheckError::Protocol(format!("fail to parse the peer certificate: {e}"))
        })?;
        // x509-parser返回time库的Duration，立即折算成std的整秒；
        // 已过期的证书剩余为0
        let remaining = Duration::from_secs(
            certificate
                .validity()
                .time_to_expiration()
                .map(|d| d.whole_seconds().max(0) as u64)
                .unwrap_or(0),
        );
        if remaining < delay {
            return Err(CheckError::Protocol(format!(
                "the certificate for {} will expire in {}",
                self.addr,
                humantime::format_duration(remaining)
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Probe for TlsProbe {
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
        "tls"
    }

    fn summary(&self) -> String {
        let endpoint = format!("tls {}:{}", self.config.target, self.config.port);
        match &self.config.description {
            Some(description) => format!("{description}, {endpoint}"),
            None => endpoint,
        }
    }

    async fn initialize(&mut self) -> Result<(), ProbeError> {
        self.addr = join_host_port(&self.config.target, self.config.port);
        let sni = self
            .config
            .server_name
            .clone()
            .unwrap_or_else(|| self.config.target.clone());
        self.server_name = Some(
            ServerName::try_from(sni.clone())
                .map_err(|_| self.init_failure(format!("the server name {sni} is invalid")))?,
        );
        let client_config = self.build_client_config()?;
        self.connector = Some(TlsConnector::from(Arc::new(client_config)));
        Ok(())
    }

    async fn execute(&self) -> Result<(), CheckError> {
        debug!(
            name = %self.config.name,
            target = %self.config.target,
            port = self.config.port,
            "开始执行TLS探测"
        );
        let stream = timeout(self.config.timeout, self.dial())
            .await
            .map_err(|_| CheckError::Timeout(self.config.timeout))??;
        if let Some(delay) = self.config.expiration_delay {
            self.check_expiration(&stream, delay)?;
        }
        drop(stream);
        Ok(())
    }

    fn spec(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// 自签名证书，有效期至2046年
    const LONG_LIVED_CERT: &str = "-----BEGIN CERTIFICATE-----
MIIBfTCCASOgAwIBAgIUQ4iD7y/NGsSlGJZM+vYRV7uRad8wCgYIKoZIzj0EAwIw
FDESMBAGA1UEAwwJbG9jYWxob3N0MB4XDTI2MDgwMjA1MTAzNloXDTQ2MDcyODA1
MTAzNlowFDESMBAGA1UEAwwJbG9jYWxob3N0MFkwEwYHKoZIzj0CAQYIKoZIzj0D
AQcDQgAEKHGyXSejzZ+9SL6RRFP24ebn/Rzu7pBkolNWWbLopXoo4Oeknkb9Oi6E
vr1xblsNmWvfHQ2nKYZwfuCkVbjIVaNTMFEwHQYDVR0OBBYEFGzeF2dnT38bOYoY
mdRKO+kKljE5MB8GA1UdIwQYMBaAFGzeF2dnT38bOYoYmdRKO+kKljE5MA8GA1Ud
EwEB/wQFMAMBAf8wCgYIKoZIzj0EAwIDSAAwRQIgWx9pcyt95uTunSr4inFju/u7
kKJ4TSJLZi2aYPXrGg0CIQCOUsB+WHYeZlyH5VVn33PtPPkTlZwztoIVuUMeqDuA
cA==
-----END CERTIFICATE-----
";

    /// 自签名证书，签发时有效期仅一天，对任何像样的窗口都算临期
    const NEAR_EXPIRY_CERT: &str = "-----BEGIN CERTIFICATE-----
MIIBfTCCASOgAwIBAgIUZbdQBObEBo3V7egmZzRjSB78xK0wCgYIKoZIzj0EAwIw
FDESMBAGA1UEAwwJbG9jYWxob3N0MB4XDTI2MDgwMjA1MTAzNloXDTI2MDgwMzA1
MTAzNlowFDESMBAGA1UEAwwJbG9jYWxob3N0MFkwEwYHKoZIzj0CAQYIKoZIzj0D
AQcDQgAEZ0OGAozpg3PkSvd5Eo2AkXoAGrabPXnjIzR+tO6GgDpmGA/18P6OKKo3
KJ7bNAe60hODJKy2nGx8NY7MjRnLlKNTMFEwHQYDVR0OBBYEFO4vykA0t1OJek1Z
wLzl0dY/iZp/MB8GA1UdIwQYMBaAFO4vykA0t1OJek1ZwLzl0dY/iZp/MA8GA1Ud
EwEB/wQFMAMBAf8wCgYIKoZIzj0EAwIDSAAwRQIgQjwkfb5eDxj10+5lZUft69yr
6xLaEsI3rqPhVR+dZZMCIQCxWd1ULmZ1a5ajlXSoOlb2me5n5RR+/w83/ntOx0W+
vw==
-----END CERTIFICATE-----
";

    fn create_test_config(target: &str, port: u16) -> TlsProbeConfig {
        TlsProbeConfig {
            name: "tls-test".to_string(),
            description: None,
            target: target.to_string(),
            port,
            server_name: None,
            cacert: None,
            cert: None,
            key: None,
            expiration_delay: None,
            timeout: Duration::from_secs(1),
            interval: Duration::from_secs(5),
            one_off: false,
            source: Source::File,
        }
    }

    #[test]
    fn test_tls_config_validation() {
        assert!(create_test_config("example.com", 443).validate().is_ok());

        let mut config = create_test_config("example.com", 443);
        config.target = String::new();
        assert!(config.validate().is_err());

        let mut config = create_test_config("example.com", 443);
        config.port = 0;
        assert!(config.validate().is_err());

        let mut config = create_test_config("example.com", 443);
        config.key = Some(PathBuf::from("/tmp/key.pem"));
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_tls_initialize_builds_connector() {
        let mut probe = TlsProbe::new(create_test_config("example.com", 443)).unwrap();
        probe.initialize().await.unwrap();
        assert_eq!(probe.addr, "example.com:443");
        assert!(probe.connector.is_some());
        assert!(probe.server_name.is_some());
    }

    #[tokio::test]
    async fn test_tls_initialize_uses_configured_server_name() {
        let mut config = create_test_config("127.0.0.1", 443);
        config.server_name = Some("example.com".to_string());
        let mut probe = TlsProbe::new(config).unwrap();
        probe.initialize().await.unwrap();
        assert!(matches!(probe.server_name, Some(ServerName::DnsName(_))));
    }

    #[tokio::test]
    async fn test_tls_certificate_expiration_window() {
        let mut probe = TlsProbe::new(create_test_config("localhost", 443)).unwrap();
        probe.initialize().await.unwrap();
        let delay = Duration::from_secs(30 * 24 * 3600); // 30天窗口

        // 剩余有效期远大于窗口
        let cert = CertificateDer::from_pem_slice(LONG_LIVED_CERT.as_bytes()).unwrap();
        assert!(probe
            .check_certificate_expiration(cert.as_ref(), delay)
            .is_ok());

        // 临期（或已过期）证书必须判定失败
        let cert = CertificateDer::from_pem_slice(NEAR_EXPIRY_CERT.as_bytes()).unwrap();
        let err = probe
            .check_certificate_expiration(cert.as_ref(), delay)
            .unwrap_err();
        assert!(matches!(err, CheckError::Protocol(_)));
        assert!(err.to_string().contains("will expire"));

        // 无法解析的字节报协议错误
        let err = probe
            .check_certificate_expiration(&[0x30, 0x03, 0x01, 0x02, 0x03], delay)
            .unwrap_err();
        assert!(err.to_string().contains("fail to parse the peer certificate"));
    }

    #[tokio::test]
    async fn test_tls_execute_against_plain_listener() {
        // 监听后立即关闭连接，握手必然失败
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let mut config = create_test_config("127.0.0.1", port);
        config.server_name = Some("localhost".to_string());
        let mut probe = TlsProbe::new(config).unwrap();
        probe.initialize().await.unwrap();
        assert!(probe.execute().await.is_err());
    }
}
