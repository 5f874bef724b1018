//! 配置数据结构定义
//!
//! 定义应用程序的配置结构体和验证逻辑。配置文件中的探测定义复用
//! 各种类的线上配置结构，启动时以`file`来源装入注册中心。

use crate::error::ConfigError;
use crate::probe::command::{CommandProbe, CommandProbeConfig};
use crate::probe::dns::{DnsProbe, DnsProbeConfig};
use crate::probe::http::{HttpProbe, HttpProbeConfig};
use crate::probe::tcp::{TcpProbe, TcpProbeConfig};
use crate::probe::tls::{TlsProbe, TlsProbeConfig};
use crate::probe::{Probe, Source};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;

/// 主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// 全局配置项
    #[serde(default)]
    pub global: GlobalConfig,
    /// Web控制面配置
    #[serde(default)]
    pub web: WebConfig,
    /// DNS探测列表
    #[serde(default)]
    pub dns_checks: Vec<DnsProbeConfig>,
    /// TCP探测列表
    #[serde(default)]
    pub tcp_checks: Vec<TcpProbeConfig>,
    /// TLS探测列表
    #[serde(default)]
    pub tls_checks: Vec<TlsProbeConfig>,
    /// HTTP探测列表
    #[serde(default)]
    pub http_checks: Vec<HttpProbeConfig>,
    /// 命令探测列表
    #[serde(default)]
    pub command_checks: Vec<CommandProbeConfig>,
}

/// 全局配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 是否使用JSON格式日志
    #[serde(default)]
    pub json_logs: bool,
    /// 结果通道容量。0按1处理（尽可能接近无缓冲）
    #[serde(default = "default_result_buffer_size")]
    pub result_buffer_size: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            result_buffer_size: default_result_buffer_size(),
        }
    }
}

/// Web控制面配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct WebConfig {
    /// 是否启用控制面
    #[serde(default = "default_web_enabled")]
    pub enabled: bool,
    /// 绑定地址
    #[serde(default = "default_web_bind_address")]
    pub bind_address: String,
    /// 监听端口
    #[serde(default = "default_web_port")]
    pub port: u16,
    /// API密钥，配置后所有请求都需要携带
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            enabled: default_web_enabled(),
            bind_address: default_web_bind_address(),
            port: default_web_port(),
            api_key: None,
        }
    }
}

impl WebConfig {
    /// 解析出监听的socket地址
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_address, self.port)
            .parse()
            .map_err(|e| {
                ConfigError::ValidationError(format!(
                    "无效的Web服务器监听地址 {}:{}: {}",
                    self.bind_address, self.port, e
                ))
            })
    }
}

// 默认值函数
fn default_log_level() -> String {
    "info".to_string()
}
fn default_result_buffer_size() -> usize {
    64
}
fn default_web_enabled() -> bool {
    true
}
fn default_web_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_web_port() -> u16 {
    9595
}

/// 配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &Config) -> Result<(), String> {
    // 验证日志级别
    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&config.global.log_level.as_str()) {
        return Err(format!(
            "无效的日志级别: {}，支持的级别: {:?}",
            config.global.log_level, valid_log_levels
        ));
    }

    // 验证Web配置（如果启用）
    if config.web.enabled {
        if config.web.port == 0 {
            return Err("Web服务器端口不能为0".to_string());
        }
        if config.web.bind_address.is_empty() {
            return Err("Web服务器绑定地址不能为空".to_string());
        }
        config.web.socket_addr().map_err(|e| e.to_string())?;
    }

    // 验证探测定义，并确保名称不重复
    let mut names = HashSet::new();
    let mut check_name = |name: &str| -> Result<(), String> {
        if !names.insert(name.to_string()) {
            return Err(format!("探测名称重复: {name}"));
        }
        Ok(())
    };

    for check in &config.dns_checks {
        check.validate().map_err(|e| e.to_string())?;
        check_name(&check.name)?;
        if check.one_off {
            return Err(format!("配置文件中的探测 {} 不能是一次性探测", check.name));
        }
    }
    for check in &config.tcp_checks {
        check.validate().map_err(|e| e.to_string())?;
        check_name(&check.name)?;
        if check.one_off {
            return Err(format!("配置文件中的探测 {} 不能是一次性探测", check.name));
        }
    }
    for check in &config.tls_checks {
        check.validate().map_err(|e| e.to_string())?;
        check_name(&check.name)?;
        if check.one_off {
            return Err(format!("配置文件中的探测 {} 不能是一次性探测", check.name));
        }
    }
    for check in &config.http_checks {
        check.validate().map_err(|e| e.to_string())?;
        check_name(&check.name)?;
        if check.one_off {
            return Err(format!("配置文件中的探测 {} 不能是一次性探测", check.name));
        }
    }
    for check in &config.command_checks {
        check.validate().map_err(|e| e.to_string())?;
        check_name(&check.name)?;
        if check.one_off {
            return Err(format!("配置文件中的探测 {} 不能是一次性探测", check.name));
        }
    }

    Ok(())
}

impl Config {
    /// 配置文件中定义的探测数量
    pub fn probe_count(&self) -> usize {
        self.dns_checks.len()
            + self.tcp_checks.len()
            + self.tls_checks.len()
            + self.http_checks.len()
            + self.command_checks.len()
    }

    /// 构造配置文件中定义的全部探测，来源统一标记为`file`
    pub fn build_probes(&self) -> Result<Vec<Box<dyn Probe>>, crate::error::ProbeError> {
        let mut probes: Vec<Box<dyn Probe>> = Vec::with_capacity(self.probe_count());
        for check in &self.dns_checks {
            let mut config = check.clone();
            config.source = Source::File;
            probes.push(Box::new(DnsProbe::new(config)?));
        }
        for check in &self.tcp_checks {
            let mut config = check.clone();
            config.source = Source::File;
            probes.push(Box::new(TcpProbe::new(config)?));
        }
        for check in &self.tls_checks {
            let mut config = check.clone();
            config.source = Source::File;
            probes.push(Box::new(TlsProbe::new(config)?));
        }
        for check in &self.http_checks {
            let mut config = check.clone();
            config.source = Source::File;
            probes.push(Box::new(HttpProbe::new(config)?));
        }
        for check in &self.command_checks {
            let mut config = check.clone();
            config.source = Source::File;
            probes.push(Box::new(CommandProbe::new(config)?));
        }
        Ok(probes)
    }
}
