//! 结果内存存储
//!
//! 共享结果通道的外部消费者：保留每个探测最近一次的结果，
//! 供控制面的结果查询接口使用。

use crate::probe::ProbeResult;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 按探测名称保存最近一次结果的存储
#[derive(Default)]
pub struct MemoryStore {
    results: RwLock<HashMap<String, ProbeResult>>,
}

impl MemoryStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入一条结果，覆盖同名探测的上一条
    pub async fn update(&self, result: ProbeResult) {
        if result.success {
            debug!(name = %result.name, "探测成功, 耗时{:.3}秒", result.duration);
        } else {
            warn!(name = %result.name, "探测失败: {}", result.message);
        }
        let mut results = self.results.write().await;
        results.insert(result.name.clone(), result);
    }

    /// 返回所有最近结果的快照
    pub async fn list(&self) -> Vec<ProbeResult> {
        self.results.read().await.values().cloned().collect()
    }

    /// 查询指定探测的最近结果
    pub async fn get(&self, name: &str) -> Option<ProbeResult> {
        self.results.read().await.get(name).cloned()
    }

    /// 删除指定探测的结果
    pub async fn remove(&self, name: &str) {
        self.results.write().await.remove(name);
    }
}

/// 启动结果消费任务
///
/// 从共享通道中持续取出结果写入存储，通道关闭后退出。
pub fn spawn_consumer(
    store: Arc<MemoryStore>,
    mut receiver: mpsc::Receiver<ProbeResult>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("结果消费任务已启动");
        while let Some(result) = receiver.recv().await {
            store.update(result).await;
        }
        info!("结果通道已关闭，消费任务退出");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn result(name: &str, success: bool) -> ProbeResult {
        ProbeResult {
            name: name.to_string(),
            success,
            timestamp: Utc::now(),
            duration: 0.01,
            message: if success {
                "success".to_string()
            } else {
                "boom".to_string()
            },
            source: "api".to_string(),
        }
    }

    #[tokio::test]
    async fn test_store_keeps_latest_result() {
        let store = MemoryStore::new();
        store.update(result("a", true)).await;
        store.update(result("a", false)).await;

        let latest = store.get("a").await.unwrap();
        assert!(!latest.success);
        assert_eq!(store.list().await.len(), 1);

        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_store_remove() {
        let store = MemoryStore::new();
        store.update(result("a", true)).await;
        store.remove("a").await;
        assert!(store.get("a").await.is_none());
    }

    #[tokio::test]
    async fn test_consumer_drains_channel() {
        let store = Arc::new(MemoryStore::new());
        let (tx, rx) = mpsc::channel(8);
        let handle = spawn_consumer(store.clone(), rx);

        tx.send(result("a", true)).await.unwrap();
        tx.send(result("b", false)).await.unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(store.list().await.len(), 2);
        assert!(store.get("a").await.unwrap().success);
        assert!(!store.get("b").await.unwrap().success);
    }
}
