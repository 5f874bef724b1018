//! Web服务器实现
//!
//! 绑定监听地址并支持优雅关闭

use super::{handlers, WebContext};
use crate::error::Result;
use anyhow::anyhow;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use warp::Filter;

/// 启动Web控制面
///
/// # 参数
/// * `ctx` - 控制面共享状态
/// * `shutdown_rx` - 关闭信号接收器，收到信号后优雅退出
pub async fn start(
    ctx: Arc<WebContext>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = ctx.config.socket_addr()?;
    let routes = handlers::routes(ctx).recover(handlers::handle_rejection);

    let (bound, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, async move {
            let _ = shutdown_rx.recv().await;
            info!("接收到关闭信号，正在关闭Web控制面...");
        })
        .map_err(|e| anyhow!("绑定Web控制面监听地址{addr}失败: {e}"))?;

    info!("Web控制面已启动: http://{}", bound);
    server.await;
    info!("Web控制面已关闭");
    Ok(())
}
