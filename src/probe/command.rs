//! 命令探测实现
//!
//! 以超时约束执行外部命令，捕获stderr，退出码为0即视为成功

use crate::error::{CheckError, ProbeError};
use crate::probe::{duration, BaseConfig, Probe, Source};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

/// 命令探测配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct CommandProbeConfig {
    /// 探测名称
    pub name: String,
    /// 探测描述
    #[serde(default)]
    pub description: Option<String>,
    /// 要执行的命令
    pub command: String,
    /// 命令参数
    #[serde(default)]
    pub arguments: Vec<String>,
    /// 单次执行的超时时间
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

impl CommandProbeConfig {
    /// 验证配置
    pub fn validate(&self) -> Result<(), ProbeError> {
        let base = self.to_base();
        base.validate()?;
        if self.command.is_empty() {
            return Err(ProbeError::InvalidConfig(
                "the probe command is missing".to_string(),
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

/// 命令探测
pub struct CommandProbe {
    config: CommandProbeConfig,
    base: BaseConfig,
}

impl CommandProbe {
    /// 从配置创建命令探测，配置无效时返回错误
    pub fn new(config: CommandProbeConfig) -> Result<Self, ProbeError> {
        config.validate()?;
        Ok(Self {
            base: config.to_base(),
            config,
        })
    }
}

#[async_trait]
impl Probe for CommandProbe {
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
        "command"
    }

    fn summary(&self) -> String {
        let endpoint = format!("command {}", self.config.command);
        match &self.config.description {
            Some(description) => format!("{description}, {endpoint}"),
            None => endpoint,
        }
    }

    async fn initialize(&mut self) -> Result<(), ProbeError> {
        Ok(())
    }

    async fn execute(&self) -> Result<(), CheckError> {
        debug!(
            name = %self.config.name,
            command = %self.config.command,
            "开始执行命令探测"
        );
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.arguments)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // 超时后丢弃future时顺带杀掉子进程
            .kill_on_drop(true);

        let output = timeout(self.config.timeout, command.output())
            .await
            .map_err(|_| CheckError::Timeout(self.config.timeout))?
            .map_err(|e| {
                CheckError::Io(format!(
                    "fail to execute the command {}: {}",
                    self.config.command, e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(match output.status.code() {
                Some(code) => CheckError::Exit(format!(
                    "the command failed with code={}, stderr={}",
                    code,
                    stderr.trim_end()
                )),
                None => CheckError::Exit(format!(
                    "the command was terminated by a signal, stderr={}",
                    stderr.trim_end()
                )),
            });
        }
        Ok(())
    }

    fn spec(&self) -> serde_json::Value {
        serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config(command: &str, arguments: Vec<&str>) -> CommandProbeConfig {
        CommandProbeConfig {
            name: "command-test".to_string(),
            description: None,
            command: command.to_string(),
            arguments: arguments.into_iter().map(String::from).collect(),
            timeout: Duration::from_secs(1),
            interval: Duration::from_secs(2),
            one_off: false,
            source: Source::File,
        }
    }

    #[test]
    fn test_command_config_validation() {
        assert!(create_test_config("true", vec![]).validate().is_ok());

        let mut config = create_test_config("true", vec![]);
        config.command = String::new();
        assert!(config.validate().is_err());

        let mut config = create_test_config("true", vec![]);
        config.timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        // 一次性探测不校验间隔
        let mut config = create_test_config("true", vec![]);
        config.one_off = true;
        config.interval = Duration::ZERO;
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_command_execute_success() {
        let mut probe = CommandProbe::new(create_test_config("true", vec![])).unwrap();
        probe.initialize().await.unwrap();
        assert!(probe.execute().await.is_ok());
    }

    #[tokio::test]
    async fn test_command_execute_nonzero_exit() {
        let mut probe = CommandProbe::new(create_test_config("sh", vec![
            "-c",
            "echo boom >&2; exit 3",
        ]))
        .unwrap();
        probe.initialize().await.unwrap();

        let err = probe.execute().await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("code=3"));
        assert!(message.contains("boom"));
    }

    #[tokio::test]
    async fn test_command_execute_timeout() {
        let mut probe =
            CommandProbe::new(create_test_config("sleep", vec!["10"])).unwrap();
        probe.initialize().await.unwrap();

        let start = std::time::Instant::now();
        let err = probe.execute().await.unwrap_err();
        assert!(matches!(err, CheckError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_command_execute_missing_binary() {
        let mut probe = CommandProbe::new(create_test_config(
            "/does/not/exist/probe-vitals-test",
            vec![],
        ))
        .unwrap();
        probe.initialize().await.unwrap();

        let err = probe.execute().await.unwrap_err();
        assert!(err.to_string().contains("fail to execute the command"));
    }
}
