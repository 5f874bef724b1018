//! 注册中心端到端测试
//!
//! 通过公开API驱动真实的TCP/DNS/命令探测，覆盖周期调度、替换、
//! 批量调和、超时和验证等行为。

use probe_vitals::probe::command::{CommandProbe, CommandProbeConfig};
use probe_vitals::probe::dns::{DnsProbe, DnsProbeConfig};
use probe_vitals::probe::tcp::{TcpProbe, TcpProbeConfig};
use probe_vitals::probe::{Probe, ProbeResult, Source};
use probe_vitals::registry::{execute_one_off, ProbeRegistry};
use probe_vitals::ProbeError;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};

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

async fn open_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            if listener.accept().await.is_err() {
                break;
            }
        }
    });
    port
}

/// 在截止时间前尽量多地收集结果
async fn collect_until(
    rx: &mut mpsc::Receiver<ProbeResult>,
    deadline: Instant,
) -> Vec<ProbeResult> {
    let mut results = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return results;
        }
        match timeout(remaining, rx.recv()).await {
            Ok(Some(result)) => results.push(result),
            _ => return results,
        }
    }
}

#[tokio::test]
async fn test_tcp_probe_emits_successes() {
    let port = open_port().await;
    let (registry, mut rx) = new_registry();

    registry.add(tcp_probe("t1", port)).await.unwrap();

    let results = collect_until(&mut rx, Instant::now() + Duration::from_secs(5)).await;
    assert!(results.len() >= 2, "expected at least 2 results in 5s");
    for result in &results {
        assert_eq!(result.name, "t1");
        assert!(result.success);
        assert_eq!(result.message, "success");
        assert_eq!(result.source, "api");
        assert!(result.duration < 1.0);
    }

    registry.stop().await.unwrap();
}

#[tokio::test]
async fn test_tcp_probe_reports_connection_failure() {
    let (registry, mut rx) = new_registry();

    // 端口1不可达
    registry.add(tcp_probe("t2", 1)).await.unwrap();

    let result = timeout(Duration::from_secs(4), rx.recv())
        .await
        .expect("no result within 4s")
        .unwrap();
    assert_eq!(result.name, "t2");
    assert!(!result.success);
    assert!(result.message.contains("TCP connection failed"));

    registry.stop().await.unwrap();
}

#[tokio::test]
async fn test_dns_probe_resolves_localhost() {
    let (registry, mut rx) = new_registry();

    let config = DnsProbeConfig {
        name: "d1".to_string(),
        description: None,
        domain: "localhost".to_string(),
        timeout: None,
        interval: Duration::from_secs(2),
        one_off: false,
        source: Source::Api,
    };
    registry
        .add(Box::new(DnsProbe::new(config).unwrap()))
        .await
        .unwrap();

    let result = timeout(Duration::from_secs(4), rx.recv())
        .await
        .expect("no result within 4s")
        .unwrap();
    assert_eq!(result.name, "d1");
    assert!(result.success, "unexpected failure: {}", result.message);

    registry.stop().await.unwrap();
}

#[tokio::test]
async fn test_replace_stops_prior_probe_before_first_new_execute() {
    let port = open_port().await;
    let (registry, mut rx) = new_registry();

    // 第一个探测指向开放端口，持续成功
    registry.add(tcp_probe("x", port)).await.unwrap();
    let first = timeout(Duration::from_secs(4), rx.recv())
        .await
        .expect("no result within 4s")
        .unwrap();
    assert!(first.success);

    // 替换为指向关闭端口的同名探测
    registry.add(tcp_probe("x", 1)).await.unwrap();

    // add返回时旧驱动已经退出，通道里最多残留替换前投递的结果
    while rx.try_recv().is_ok() {}

    let results = collect_until(&mut rx, Instant::now() + Duration::from_secs(5)).await;
    assert!(!results.is_empty());
    for result in &results {
        assert_eq!(result.name, "x");
        assert!(!result.success, "old probe still emitting after replace");
    }

    registry.stop().await.unwrap();
}

#[tokio::test]
async fn test_no_result_after_remove_returns() {
    let port = open_port().await;
    let (registry, mut rx) = new_registry();

    registry.add(tcp_probe("gone", port)).await.unwrap();
    let _ = timeout(Duration::from_secs(4), rx.recv())
        .await
        .expect("no result within 4s")
        .unwrap();

    registry.remove("gone").await.unwrap();
    while rx.try_recv().is_ok() {}

    // 两个完整周期内不得再有结果
    let results = collect_until(&mut rx, Instant::now() + Duration::from_secs(5)).await;
    assert!(results.is_empty(), "probe emitted after remove returned");

    registry.stop().await.unwrap();
}

#[tokio::test]
async fn test_bulk_reconcile_by_source() {
    let (registry, _rx) = new_registry();

    // 安装{a,b,c}，来源api
    for name in ["a", "b", "c"] {
        registry.add(tcp_probe(name, 1)).await.unwrap();
    }
    let old = registry.check_names_by_source(Source::Api).await;
    assert_eq!(old.len(), 3);

    // 再安装{b,c,d}并按来源调和
    for name in ["b", "c", "d"] {
        registry.add(tcp_probe(name, 1)).await.unwrap();
    }
    let new: HashSet<String> = ["b", "c", "d"].iter().map(|s| s.to_string()).collect();
    registry.reconcile_bulk(&old, &new).await.unwrap();

    assert!(registry.get("a").await.is_none());
    let mut names: Vec<String> = registry
        .list()
        .await
        .iter()
        .map(|p| p.name().to_string())
        .collect();
    names.sort();
    assert_eq!(names, vec!["b", "c", "d"]);

    registry.stop().await.unwrap();
}

#[tokio::test]
async fn test_command_probe_times_out() {
    let (registry, mut rx) = new_registry();

    let config = CommandProbeConfig {
        name: "slow".to_string(),
        description: None,
        command: "sleep".to_string(),
        arguments: vec!["10".to_string()],
        timeout: Duration::from_secs(1),
        interval: Duration::from_secs(2),
        one_off: false,
        source: Source::Api,
    };
    registry
        .add(Box::new(CommandProbe::new(config).unwrap()))
        .await
        .unwrap();

    let result = timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no result within 5s")
        .unwrap();
    assert!(!result.success);
    assert!(result.message.contains("timed out"));
    // 执行在超时附近被掐断，不会等完整个sleep
    assert!(result.duration < 1.8, "duration was {}", result.duration);

    registry.stop().await.unwrap();
}

#[tokio::test]
async fn test_validation_failure_leaves_registry_unchanged() {
    let (registry, _rx) = new_registry();
    registry.add(tcp_probe("ok", 1)).await.unwrap();

    let mut config = tcp_config("bad", 1);
    config.interval = Duration::from_secs(1);
    let err = TcpProbe::new(config).unwrap_err();
    assert!(matches!(err, ProbeError::InvalidConfig(_)));

    assert_eq!(registry.len().await, 1);
    assert!(registry.get("bad").await.is_none());

    registry.stop().await.unwrap();
}

#[tokio::test]
async fn test_one_off_emits_nothing_on_the_sink() {
    let port = open_port().await;
    let (_registry, mut rx) = new_registry();

    let mut config = tcp_config("adhoc", port);
    config.one_off = true;
    let result = execute_one_off(Box::new(TcpProbe::new(config).unwrap()))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.source, "one-off");
    // 结果只返回给调用方，通道上没有任何东西
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_registry_stop_stops_every_probe() {
    let port = open_port().await;
    let (registry, mut rx) = new_registry();

    for name in ["s1", "s2", "s3"] {
        registry.add(tcp_probe(name, port)).await.unwrap();
    }
    registry.stop().await.unwrap();
    assert!(registry.is_empty().await);
    assert!(!registry.is_running());

    while rx.try_recv().is_ok() {}
    let results = collect_until(&mut rx, Instant::now() + Duration::from_secs(3)).await;
    assert!(results.is_empty(), "probe emitted after registry stop");
}
