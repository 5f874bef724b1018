//! 探测注册中心
//!
//! 持有全部常驻周期探测的权威集合，是所有变更操作的串行化点。
//! 注册中心本身不运行任务，只是一份由读写锁保护的被动状态。

use crate::error::{CheckError, ProbeError};
use crate::probe::worker::ProbeWorker;
use crate::probe::{Probe, ProbeResult, Source};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, MutexGuard, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info};

/// 探测注册中心
pub struct ProbeRegistry {
    /// 名称到常驻探测的映射
    probes: RwLock<HashMap<String, ProbeWorker>>,
    /// 共享结果通道的发送端，生命周期与进程相同，注册中心不拥有它
    result_tx: mpsc::Sender<ProbeResult>,
    /// 运行标志，停止后拒绝一切变更操作
    running: AtomicBool,
    /// 批量调和互斥锁，两个并发的批量操作不允许交错
    bulk_lock: Mutex<()>,
}

impl ProbeRegistry {
    /// 创建注册中心
    ///
    /// # 参数
    /// * `result_tx` - 所有探测共享的结果通道发送端
    pub fn new(result_tx: mpsc::Sender<ProbeResult>) -> Self {
        Self {
            probes: RwLock::new(HashMap::new()),
            result_tx,
            running: AtomicBool::new(false),
            bulk_lock: Mutex::new(()),
        }
    }

    /// 启动注册中心。幂等。
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("启动探测注册中心");
        }
    }

    /// 是否处于运行状态
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 停止注册中心
    ///
    /// 停止每个常驻探测并等待其驱动退出。个别探测停止失败不会中断
    /// 其余探测，最终返回遇到的第一个错误。
    pub async fn stop(&self) -> Result<(), ProbeError> {
        self.running.store(false, Ordering::SeqCst);
        info!("停止探测注册中心");
        let mut workers: Vec<ProbeWorker> = {
            let mut probes = self.probes.write().await;
            probes.drain().map(|(_, worker)| worker).collect()
        };
        let outcomes =
            futures::future::join_all(workers.iter_mut().map(|worker| worker.stop())).await;
        let mut first_error = None;
        for outcome in outcomes {
            if let Err(e) = outcome {
                error!("停止探测失败: {}", e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 添加探测
    ///
    /// 同名探测先被停止并移除，新探测随后启动，移除与插入在同一把
    /// 写锁内完成；不存在名字可见但状态陈旧的窗口。旧探测的停止最长
    /// 占用写锁一个超时。
    ///
    /// # 参数
    /// * `probe` - 已初始化或未初始化的探测
    pub async fn add(&self, mut probe: Box<dyn Probe>) -> Result<(), ProbeError> {
        self.ensure_running()?;
        if probe.base().one_off {
            return Err(ProbeError::InvalidConfig(
                "a one-off probe cannot be registered for periodic scheduling".to_string(),
            ));
        }
        probe.initialize().await?;
        let name = probe.name().to_string();

        let mut probes = self.probes.write().await;
        // stop可能在拿锁前完成清空，持锁后必须重新确认运行状态
        self.ensure_running()?;
        if let Some(mut existing) = probes.remove(&name) {
            info!(name = %name, "停止同名旧探测");
            existing.stop().await?;
        }
        let mut worker = ProbeWorker::new(Arc::from(probe));
        worker.start(self.result_tx.clone())?;
        probes.insert(name.clone(), worker);
        debug!(name = %name, "探测已登记");
        Ok(())
    }

    /// 移除探测；不存在时视为成功
    ///
    /// 探测先被摘出映射，写锁释放后再等待其驱动退出，长时间的停止
    /// 不会阻塞探测表的读者。
    pub async fn remove(&self, name: &str) -> Result<(), ProbeError> {
        self.ensure_running()?;
        let worker = {
            let mut probes = self.probes.write().await;
            probes.remove(name)
        };
        if let Some(mut worker) = worker {
            info!(name = %name, "移除探测");
            worker.stop().await?;
        }
        Ok(())
    }

    /// 按名称查询常驻探测
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Probe>> {
        self.probes.read().await.get(name).map(|worker| worker.probe())
    }

    /// 返回所有常驻探测的快照，顺序不作保证
    pub async fn list(&self) -> Vec<Arc<dyn Probe>> {
        self.probes
            .read()
            .await
            .values()
            .map(|worker| worker.probe())
            .collect()
    }

    /// 返回指定来源的所有常驻探测名称
    pub async fn check_names_by_source(&self, source: Source) -> HashSet<String> {
        self.probes
            .read()
            .await
            .iter()
            .filter(|(_, worker)| worker.probe().base().source == source)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// 批量调和：移除 `old_names \ new_names` 中的每个探测
    ///
    /// 在批量添加已经装入`new_names`中全部探测之后调用。逐个失败
    /// 不中断后续移除，最终返回遇到的第一个错误。
    pub async fn reconcile_bulk(
        &self,
        old_names: &HashSet<String>,
        new_names: &HashSet<String>,
    ) -> Result<(), ProbeError> {
        let mut first_error = None;
        for name in old_names.difference(new_names) {
            debug!(name = %name, "调和移除不再配置的探测");
            if let Err(e) = self.remove(name).await {
                error!(name = %name, "调和移除探测失败: {}", e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// 获取批量操作互斥锁
    ///
    /// 调用方在"快照旧名称集、安装新探测、调和移除"的整个序列期间
    /// 持有该守卫。
    pub async fn bulk_guard(&self) -> MutexGuard<'_, ()> {
        self.bulk_lock.lock().await
    }

    /// 当前常驻探测数量
    pub async fn len(&self) -> usize {
        self.probes.read().await.len()
    }

    /// 是否没有常驻探测
    pub async fn is_empty(&self) -> bool {
        self.probes.read().await.is_empty()
    }

    fn ensure_running(&self) -> Result<(), ProbeError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(ProbeError::RegistryStopped)
        }
    }
}

/// 一次性执行一个探测
///
/// 初始化后计时执行一次，合成的结果来源为"one-off"并直接返回给
/// 调用方；探测不进注册中心，也没有驱动，结果不会出现在共享通道上。
pub async fn execute_one_off(mut probe: Box<dyn Probe>) -> Result<ProbeResult, ProbeError> {
    info!(name = %probe.name(), "执行一次性探测: {}", probe.summary());
    probe.initialize().await?;
    let start = Instant::now();
    let outcome = match tokio::time::timeout(probe.timeout(), probe.execute()).await {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e),
        Err(_) => Some(CheckError::Timeout(probe.timeout())),
    };
    let duration = start.elapsed().as_secs_f64();
    let mut result = ProbeResult::new(probe.as_ref(), duration, outcome.as_ref());
    result.source = Source::OneOff.to_string();
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::tcp::{TcpProbe, TcpProbeConfig};
    use std::time::Duration;

    fn tcp_config(name: &str, port: u16) -> TcpProbeConfig {
        TcpProbeConfig {
            name: name.to_string(),
            description: None,
            target: "127.0.0.1".to_string(),
            port,
            timeout: Duration::from_secs(1),
            interval: Duration::from_secs(2),
            one_off: false,
            source: Source::Api,
        }
    }

    fn tcp_probe(name: &str, port: u16) -> Box<dyn Probe> {
        Box::new(TcpProbe::new(tcp_config(name, port)).unwrap())
    }

    fn new_registry() -> (Arc<ProbeRegistry>, mpsc::Receiver<ProbeResult>) {
        let (tx, rx) = mpsc::channel(64);
        let registry = Arc::new(ProbeRegistry::new(tx));
        registry.start();
        (registry, rx)
    }

    #[tokio::test]
    async fn test_registry_add_get_list_remove() {
        let (registry, _rx) = new_registry();

        registry.add(tcp_probe("a", 1)).await.unwrap();
        registry.add(tcp_probe("b", 1)).await.unwrap();
        assert_eq!(registry.len().await, 2);

        let probe = registry.get("a").await.unwrap();
        assert_eq!(probe.name(), "a");
        assert!(registry.get("missing").await.is_none());

        let mut names: Vec<String> = registry
            .list()
            .await
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);

        registry.remove("a").await.unwrap();
        assert!(registry.get("a").await.is_none());
        // 不存在的名称是空操作
        registry.remove("a").await.unwrap();
        assert_eq!(registry.len().await, 1);

        registry.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_registry_add_replaces_same_name() {
        let (registry, _rx) = new_registry();

        registry.add(tcp_probe("x", 1)).await.unwrap();
        registry.add(tcp_probe("x", 2)).await.unwrap();

        assert_eq!(registry.len().await, 1);
        let probe = registry.get("x").await.unwrap();
        let spec = probe.spec();
        assert_eq!(spec["port"], 2);

        registry.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_registry_rejects_one_off() {
        let (registry, _rx) = new_registry();

        let mut config = tcp_config("oneoff", 1);
        config.one_off = true;
        let probe = Box::new(TcpProbe::new(config).unwrap());
        assert!(matches!(
            registry.add(probe).await,
            Err(ProbeError::InvalidConfig(_))
        ));
        assert!(registry.is_empty().await);

        registry.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_registry_mutations_fail_after_stop() {
        let (registry, _rx) = new_registry();
        registry.add(tcp_probe("a", 1)).await.unwrap();
        registry.stop().await.unwrap();

        assert!(matches!(
            registry.add(tcp_probe("b", 1)).await,
            Err(ProbeError::RegistryStopped)
        ));
        assert!(matches!(
            registry.remove("a").await,
            Err(ProbeError::RegistryStopped)
        ));
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_registry_names_by_source() {
        let (registry, _rx) = new_registry();

        registry.add(tcp_probe("api-1", 1)).await.unwrap();
        registry.add(tcp_probe("api-2", 1)).await.unwrap();
        let mut file_config = tcp_config("file-1", 1);
        file_config.source = Source::File;
        registry
            .add(Box::new(TcpProbe::new(file_config).unwrap()))
            .await
            .unwrap();

        let api_names = registry.check_names_by_source(Source::Api).await;
        assert_eq!(api_names.len(), 2);
        assert!(api_names.contains("api-1"));
        assert!(api_names.contains("api-2"));

        let file_names = registry.check_names_by_source(Source::File).await;
        assert_eq!(file_names, HashSet::from(["file-1".to_string()]));

        registry.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_registry_reconcile_bulk() {
        let (registry, _rx) = new_registry();

        for name in ["a", "b", "c"] {
            registry.add(tcp_probe(name, 1)).await.unwrap();
        }

        let old: HashSet<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let new: HashSet<String> = ["b", "c", "d"].iter().map(|s| s.to_string()).collect();
        registry.reconcile_bulk(&old, &new).await.unwrap();

        assert!(registry.get("a").await.is_none());
        assert!(registry.get("b").await.is_some());
        assert!(registry.get("c").await.is_some());
        assert_eq!(registry.len().await, 2);

        registry.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_one_off_execution_does_not_register() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut config = tcp_config("adhoc", port);
        config.one_off = true;
        let probe = Box::new(TcpProbe::new(config).unwrap());

        let result = execute_one_off(probe).await.unwrap();
        assert!(result.success);
        assert_eq!(result.message, "success");
        assert_eq!(result.source, "one-off");
        assert!(result.duration >= 0.0);
    }

    #[tokio::test]
    async fn test_one_off_execution_failure_is_a_result() {
        let mut config = tcp_config("adhoc", 1);
        config.one_off = true;
        let probe = Box::new(TcpProbe::new(config).unwrap());

        let result = execute_one_off(probe).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("TCP connection failed"));
        assert_eq!(result.source, "one-off");
    }
}
