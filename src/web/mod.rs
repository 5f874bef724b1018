//! Web控制面模块
//!
//! 提供探测增删查、批量安装和结果查询的HTTP接口

pub mod auth;
pub mod handlers;
pub mod server;

use crate::config::WebConfig;
use crate::registry::ProbeRegistry;
use crate::store::MemoryStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// 通用消息响应
#[derive(Debug, Serialize, Deserialize)]
pub struct BasicResponse {
    pub message: String,
}

/// 控制面共享状态
pub struct WebContext {
    /// 探测注册中心
    pub registry: Arc<ProbeRegistry>,
    /// 结果存储
    pub store: Arc<MemoryStore>,
    /// Web配置
    pub config: WebConfig,
}

impl WebContext {
    /// 创建控制面状态
    pub fn new(
        registry: Arc<ProbeRegistry>,
        store: Arc<MemoryStore>,
        config: WebConfig,
    ) -> Self {
        Self {
            registry,
            store,
            config,
        }
    }
}
