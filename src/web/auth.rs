//! 认证模块
//!
//! 提供API密钥认证。凭证不匹配一律拒绝请求。

use super::WebContext;
use std::convert::Infallible;
use std::sync::Arc;
use warp::{http::HeaderMap, Filter, Rejection};

/// API密钥头部名称
pub const API_KEY_HEADER: &str = "X-API-Key";

/// 认证错误类型
#[derive(Debug)]
pub enum AuthError {
    /// 缺少API密钥
    MissingApiKey,
    /// 无效的API密钥
    InvalidApiKey,
}

impl warp::reject::Reject for AuthError {}

/// 创建认证过滤器
///
/// 未配置API密钥时直接放行。
pub fn auth_filter(
    ctx: Arc<WebContext>,
) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::any()
        .and(warp::header::headers_cloned())
        .and(with_ctx(ctx))
        .and_then(authenticate)
        .untuple_one()
}

fn with_ctx(
    ctx: Arc<WebContext>,
) -> impl Filter<Extract = (Arc<WebContext>,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

/// 认证处理函数
async fn authenticate(headers: HeaderMap, ctx: Arc<WebContext>) -> Result<(), Rejection> {
    let expected_api_key = match &ctx.config.api_key {
        Some(key) => key,
        None => return Ok(()),
    };

    match get_api_key_from_header(&headers) {
        Some(api_key) if api_key == *expected_api_key => Ok(()),
        Some(_) => {
            tracing::warn!("API密钥不匹配，拒绝请求");
            Err(warp::reject::custom(AuthError::InvalidApiKey))
        }
        None => Err(warp::reject::custom(AuthError::MissingApiKey)),
    }
}

/// 从HTTP头部获取API密钥
fn get_api_key_from_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|s| s.to_string())
}
