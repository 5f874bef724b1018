//! 配置管理模块
//!
//! 提供配置的数据结构定义和文件加载功能

pub mod loader;
pub mod types;

pub use loader::{ConfigLoader, TomlConfigLoader};
pub use types::{validate_config, Config, GlobalConfig, WebConfig};
