//! 控制面路由与处理函数
//!
//! 每个探测种类一个添加端点；`one-off`为真的请求走一次性执行路径，
//! 其余注册为周期探测。批量端点在互斥锁内完成安装与调和。

use super::auth::{self, AuthError};
use super::{BasicResponse, WebContext};
use crate::error::ProbeError;
use crate::probe::command::{CommandProbe, CommandProbeConfig};
use crate::probe::dns::{DnsProbe, DnsProbeConfig};
use crate::probe::http::{HttpProbe, HttpProbeConfig};
use crate::probe::tcp::{TcpProbe, TcpProbeConfig};
use crate::probe::tls::{TlsProbe, TlsProbeConfig};
use crate::probe::{Probe, Source};
use crate::registry::execute_one_off;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::{error, info};
use warp::filters::BoxedFilter;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

/// 请求体大小上限
const BODY_LIMIT: u64 = 64 * 1024;

type ApiReply = warp::reply::WithStatus<warp::reply::Json>;

/// 批量安装载荷
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct BulkPayload {
    pub dns_checks: Vec<DnsProbeConfig>,
    pub tcp_checks: Vec<TcpProbeConfig>,
    pub tls_checks: Vec<TlsProbeConfig>,
    pub http_checks: Vec<HttpProbeConfig>,
    pub command_checks: Vec<CommandProbeConfig>,
}

impl BulkPayload {
    /// 构造载荷中的全部探测，任何一个无效则整体失败
    fn build_probes(self) -> Result<Vec<Box<dyn Probe>>, ProbeError> {
        let mut probes: Vec<Box<dyn Probe>> = Vec::new();
        for config in self.dns_checks {
            Self::reject_one_off(config.one_off)?;
            probes.push(Box::new(DnsProbe::new(config)?));
        }
        for config in self.tcp_checks {
            Self::reject_one_off(config.one_off)?;
            probes.push(Box::new(TcpProbe::new(config)?));
        }
        for config in self.tls_checks {
            Self::reject_one_off(config.one_off)?;
            probes.push(Box::new(TlsProbe::new(config)?));
        }
        for config in self.http_checks {
            Self::reject_one_off(config.one_off)?;
            probes.push(Box::new(HttpProbe::new(config)?));
        }
        for config in self.command_checks {
            Self::reject_one_off(config.one_off)?;
            probes.push(Box::new(CommandProbe::new(config)?));
        }
        Ok(probes)
    }

    fn reject_one_off(one_off: bool) -> Result<(), ProbeError> {
        if one_off {
            return Err(ProbeError::InvalidConfig(
                "one-off probes are not allowed in bulk payloads".to_string(),
            ));
        }
        Ok(())
    }
}

/// 组装全部控制面路由
pub fn routes(ctx: Arc<WebContext>) -> BoxedFilter<(ApiReply,)> {
    let api = add_probe::<DnsProbeConfig, _>(ctx.clone(), "dns", |c| {
        DnsProbe::new(c).map(|p| Box::new(p) as Box<dyn Probe>)
    })
    .or(add_probe::<TcpProbeConfig, _>(ctx.clone(), "tcp", |c| {
        TcpProbe::new(c).map(|p| Box::new(p) as Box<dyn Probe>)
    }))
    .unify()
    .or(add_probe::<TlsProbeConfig, _>(ctx.clone(), "tls", |c| {
        TlsProbe::new(c).map(|p| Box::new(p) as Box<dyn Probe>)
    }))
    .unify()
    .or(add_probe::<HttpProbeConfig, _>(ctx.clone(), "http", |c| {
        HttpProbe::new(c).map(|p| Box::new(p) as Box<dyn Probe>)
    }))
    .unify()
    .or(add_probe::<CommandProbeConfig, _>(ctx.clone(), "command", |c| {
        CommandProbe::new(c).map(|p| Box::new(p) as Box<dyn Probe>)
    }))
    .unify()
    .or(bulk_route(ctx.clone()))
    .unify()
    .or(list_route(ctx.clone()))
    .unify()
    .or(get_route(ctx.clone()))
    .unify()
    .or(delete_route(ctx.clone()))
    .unify()
    .or(result_list_route(ctx.clone()))
    .unify()
    .or(result_get_route(ctx.clone()))
    .unify();

    health_route()
        .or(auth::auth_filter(ctx).and(api))
        .unify()
        .boxed()
}

fn with_ctx(
    ctx: Arc<WebContext>,
) -> impl Filter<Extract = (Arc<WebContext>,), Error = Infallible> + Clone {
    warp::any().map(move || ctx.clone())
}

fn json_body<T: DeserializeOwned + Send>(
) -> impl Filter<Extract = (T,), Error = Rejection> + Clone {
    warp::body::content_length_limit(BODY_LIMIT).and(warp::body::json())
}

fn reply_message(status: StatusCode, message: impl Into<String>) -> ApiReply {
    warp::reply::with_status(
        warp::reply::json(&BasicResponse {
            message: message.into(),
        }),
        status,
    )
}

/// 探测生命周期错误到HTTP状态码的映射
fn probe_error_reply(err: &ProbeError) -> ApiReply {
    let status = match err {
        ProbeError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    reply_message(status, err.to_string())
}

/// 某个种类的添加端点：POST /healthcheck/{kind}
fn add_probe<C, F>(
    ctx: Arc<WebContext>,
    kind: &'static str,
    build: F,
) -> impl Filter<Extract = (ApiReply,), Error = Rejection> + Clone
where
    C: DeserializeOwned + Send + 'static,
    F: Fn(C) -> Result<Box<dyn Probe>, ProbeError> + Clone + Send + Sync + 'static,
{
    warp::path("healthcheck")
        .and(warp::path(kind))
        .and(warp::path::end())
        .and(warp::post())
        .and(json_body::<C>())
        .and(with_ctx(ctx))
        .and_then(move |config: C, ctx: Arc<WebContext>| {
            let build = build.clone();
            async move {
                match build(config) {
                    Ok(probe) => handle_check(ctx, probe).await,
                    Err(e) => {
                        error!("探测配置无效: {}", e);
                        Ok::<_, Rejection>(probe_error_reply(&e))
                    }
                }
            }
        })
}

/// 添加或一次性执行一个构造好的探测
async fn handle_check(
    ctx: Arc<WebContext>,
    mut probe: Box<dyn Probe>,
) -> Result<ApiReply, Rejection> {
    if probe.base().one_off {
        return match execute_one_off(probe).await {
            Ok(result) => Ok(warp::reply::with_status(
                warp::reply::json(&result),
                StatusCode::CREATED,
            )),
            Err(e) => {
                error!("一次性探测执行失败: {}", e);
                Ok(probe_error_reply(&e))
            }
        };
    }
    probe.set_source(Source::Api);
    match ctx.registry.add(probe).await {
        Ok(()) => Ok(reply_message(
            StatusCode::CREATED,
            "the probe was successfully added",
        )),
        Err(e) => {
            error!("添加探测失败: {}", e);
            Ok(probe_error_reply(&e))
        }
    }
}

/// POST /healthcheck/bulk
fn bulk_route(
    ctx: Arc<WebContext>,
) -> impl Filter<Extract = (ApiReply,), Error = Rejection> + Clone {
    warp::path!("healthcheck" / "bulk")
        .and(warp::post())
        .and(json_body::<BulkPayload>())
        .and(with_ctx(ctx))
        .and_then(handle_bulk)
}

async fn handle_bulk(
    payload: BulkPayload,
    ctx: Arc<WebContext>,
) -> Result<ApiReply, Rejection> {
    let probes = match payload.build_probes() {
        Ok(probes) => probes,
        Err(e) => {
            error!("批量载荷无效: {}", e);
            return Ok(probe_error_reply(&e));
        }
    };

    // 两个并发的批量操作不允许交错调和
    let _guard = ctx.registry.bulk_guard().await;
    let old_names = ctx.registry.check_names_by_source(Source::Api).await;
    let mut new_names = HashSet::new();
    for mut probe in probes {
        probe.set_source(Source::Api);
        new_names.insert(probe.name().to_string());
        if let Err(e) = ctx.registry.add(probe).await {
            error!("批量添加探测失败: {}", e);
            return Ok(probe_error_reply(&e));
        }
    }
    if let Err(e) = ctx.registry.reconcile_bulk(&old_names, &new_names).await {
        error!("批量调和失败: {}", e);
        return Ok(probe_error_reply(&e));
    }
    info!("批量安装完成，共{}个探测", new_names.len());
    Ok(reply_message(
        StatusCode::CREATED,
        "the probes were successfully added",
    ))
}

/// GET /healthcheck
fn list_route(
    ctx: Arc<WebContext>,
) -> impl Filter<Extract = (ApiReply,), Error = Rejection> + Clone {
    warp::path!("healthcheck")
        .and(warp::get())
        .and(with_ctx(ctx))
        .and_then(|ctx: Arc<WebContext>| async move {
            let specs: Vec<serde_json::Value> = ctx
                .registry
                .list()
                .await
                .iter()
                .map(|probe| probe.spec())
                .collect();
            Ok::<_, Rejection>(warp::reply::with_status(
                warp::reply::json(&specs),
                StatusCode::OK,
            ))
        })
}

/// GET /healthcheck/{name}
fn get_route(
    ctx: Arc<WebContext>,
) -> impl Filter<Extract = (ApiReply,), Error = Rejection> + Clone {
    warp::path!("healthcheck" / String)
        .and(warp::get())
        .and(with_ctx(ctx))
        .and_then(|name: String, ctx: Arc<WebContext>| async move {
            let reply = match ctx.registry.get(&name).await {
                Some(probe) => warp::reply::with_status(
                    warp::reply::json(&probe.spec()),
                    StatusCode::OK,
                ),
                None => reply_message(
                    StatusCode::NOT_FOUND,
                    format!("the probe {name} does not exist"),
                ),
            };
            Ok::<_, Rejection>(reply)
        })
}

/// DELETE /healthcheck/{name}
fn delete_route(
    ctx: Arc<WebContext>,
) -> impl Filter<Extract = (ApiReply,), Error = Rejection> + Clone {
    warp::path!("healthcheck" / String)
        .and(warp::delete())
        .and(with_ctx(ctx))
        .and_then(|name: String, ctx: Arc<WebContext>| async move {
            info!(name = %name, "收到删除探测请求");
            let reply = match ctx.registry.remove(&name).await {
                Ok(()) => {
                    ctx.store.remove(&name).await;
                    reply_message(
                        StatusCode::OK,
                        format!("the probe {name} was successfully removed"),
                    )
                }
                Err(e) => {
                    error!("移除探测失败: {}", e);
                    probe_error_reply(&e)
                }
            };
            Ok::<_, Rejection>(reply)
        })
}

/// GET /result
fn result_list_route(
    ctx: Arc<WebContext>,
) -> impl Filter<Extract = (ApiReply,), Error = Rejection> + Clone {
    warp::path!("result")
        .and(warp::get())
        .and(with_ctx(ctx))
        .and_then(|ctx: Arc<WebContext>| async move {
            Ok::<_, Rejection>(warp::reply::with_status(
                warp::reply::json(&ctx.store.list().await),
                StatusCode::OK,
            ))
        })
}

/// GET /result/{name}
fn result_get_route(
    ctx: Arc<WebContext>,
) -> impl Filter<Extract = (ApiReply,), Error = Rejection> + Clone {
    warp::path!("result" / String)
        .and(warp::get())
        .and(with_ctx(ctx))
        .and_then(|name: String, ctx: Arc<WebContext>| async move {
            let reply = match ctx.store.get(&name).await {
                Some(result) => warp::reply::with_status(
                    warp::reply::json(&result),
                    StatusCode::OK,
                ),
                None => reply_message(
                    StatusCode::NOT_FOUND,
                    format!("no result for the probe {name}"),
                ),
            };
            Ok::<_, Rejection>(reply)
        })
}

/// GET /health 和 GET /healthz
fn health_route() -> impl Filter<Extract = (ApiReply,), Error = Rejection> + Clone {
    let health = warp::path!("health");
    let healthz = warp::path!("healthz");
    health
        .or(healthz)
        .unify()
        .and(warp::get())
        .map(|| warp::reply::with_status(warp::reply::json(&"ok"), StatusCode::OK))
}

/// 将过滤器链的拒绝转换为JSON错误响应
pub async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(auth_error) = err.find::<AuthError>() {
        match auth_error {
            AuthError::MissingApiKey => {
                (StatusCode::UNAUTHORIZED, "the API key is missing".to_string())
            }
            AuthError::InvalidApiKey => {
                (StatusCode::UNAUTHORIZED, "the API key is invalid".to_string())
            }
        }
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "method not allowed".to_string(),
        )
    } else {
        error!("未处理的请求拒绝: {:?}", err);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal server error".to_string(),
        )
    };
    Ok(reply_message(status, message))
}
