//! Probe Vitals 主程序入口
//!
//! 网络端点与命令健康探测服务

use anyhow::{Context, Result};
use clap::Parser;
use probe_vitals::cli::Args;
use probe_vitals::config::{Config, ConfigLoader, TomlConfigLoader};
use probe_vitals::logging::{level_filter_from_str, setup_logging, LogConfig};
use probe_vitals::registry::ProbeRegistry;
use probe_vitals::store::{self, MemoryStore};
use probe_vitals::web::{server, WebContext};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loader = TomlConfigLoader::new(true);
    let config = loader
        .load_from_file(&args.config)
        .await
        .with_context(|| format!("加载配置文件失败: {}", args.config.display()))?;

    if args.check_config {
        println!("配置有效: {}", args.config.display());
        return Ok(());
    }

    // 命令行参数优先于配置文件
    let log_config = LogConfig {
        level: match args.log_level {
            Some(level) => level.into(),
            None => level_filter_from_str(&config.global.log_level),
        },
        json_format: config.global.json_logs,
    };
    setup_logging(&log_config).context("初始化日志系统失败")?;

    info!("Probe Vitals v{} 启动", probe_vitals::VERSION);
    info!(
        "已加载配置文件: {}，定义了{}个探测",
        args.config.display(),
        config.probe_count()
    );

    if let Err(e) = run_service(config).await {
        error!("服务运行失败: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

/// 装配并运行服务，直到收到退出信号
async fn run_service(config: Config) -> Result<()> {
    // 共享结果通道。容量0按1处理，尽可能接近无缓冲
    let capacity = config.global.result_buffer_size.max(1);
    let (result_tx, result_rx) = mpsc::channel(capacity);

    let store = Arc::new(MemoryStore::new());
    let consumer = store::spawn_consumer(store.clone(), result_rx);

    let registry = Arc::new(ProbeRegistry::new(result_tx));
    registry.start();

    // 装入配置文件中定义的探测
    let probes = config.build_probes()?;
    info!("从配置文件装入{}个探测", probes.len());
    for probe in probes {
        let name = probe.name().to_string();
        registry
            .add(probe)
            .await
            .with_context(|| format!("添加探测失败: {name}"))?;
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let web_handle = if config.web.enabled {
        let ctx = Arc::new(WebContext::new(
            registry.clone(),
            store.clone(),
            config.web.clone(),
        ));
        Some(tokio::spawn(server::start(ctx, shutdown_tx.subscribe())))
    } else {
        info!("Web控制面已禁用");
        None
    };

    signal::ctrl_c().await.context("等待退出信号失败")?;
    info!("接收到退出信号，开始关闭...");

    let _ = shutdown_tx.send(());
    if let Err(e) = registry.stop().await {
        error!("停止注册中心时发生错误: {}", e);
    }
    if let Some(handle) = web_handle {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Web控制面退出时发生错误: {}", e),
            Err(e) => error!("等待Web控制面任务失败: {}", e),
        }
    }
    consumer.abort();

    info!("Probe Vitals 已退出");
    Ok(())
}
