use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::{Body, to_bytes},
    extract::{ConnectInfo, State},
    http::{Request, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::pipeline::{RequestContext, RequestPipeline, StageOutcome};

/// 回填缓存时允许读取的最大响应体
const CACHE_BODY_LIMIT: usize = 1024 * 1024;

/// 把路由组的管道套在请求外面：
/// 阶段短路直接翻译为响应，放行则进入内层处理器，
/// 成功的只读响应按上下文里的键回填缓存
pub async fn run_pipeline(
    State(pipeline): State<Arc<RequestPipeline>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let mut ctx = context_from(&req);

    match pipeline.run(&mut ctx).await {
        StageOutcome::Reject(reason) => pipeline.translator().translate(&AppError::from(reason)),
        StageOutcome::ServeCached(cached) => cached_response(cached.payload),
        StageOutcome::Proceed => {
            // 认证阶段解析出的声明交给处理器
            if let Some(claims) = ctx.claims.clone() {
                req.extensions_mut().insert(claims);
            }
            let response = next.run(req).await;
            populate_cache(&pipeline, &ctx, response).await
        }
    }
}

fn context_from(req: &Request<Body>) -> RequestContext {
    // 从连接信息获取原始IP
    let remote_ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string());
    // 从请求头中获取IP，或者使用连接信息中的IP作为默认值
    let ip = req
        .headers()
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .or_else(|| {
            req.headers()
                .get("x-forwarded-for")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
        })
        .or_else(|| remote_ip.as_deref())
        .unwrap_or("unknown")
        .trim()
        .to_string();

    let bearer_token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);

    RequestContext::new(
        req.method().as_str(),
        req.uri().path(),
        req.uri().query().map(str::to_string),
        ip,
        bearer_token,
    )
}

fn cached_response(payload: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        payload,
    )
        .into_response()
}

async fn populate_cache(
    pipeline: &RequestPipeline,
    ctx: &RequestContext,
    response: Response,
) -> Response {
    let Some(population) = pipeline.cache_population() else {
        return response;
    };
    let Some(cache_key) = ctx.cache_key.as_deref() else {
        return response;
    };
    if response.status() != StatusCode::OK {
        return response;
    }

    // 回填需要完整响应体，读出后重建响应
    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, CACHE_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!("failed to read response body for caching: {}", e);
            return Response::from_parts(parts, Body::empty());
        }
    };

    if let Ok(payload) = std::str::from_utf8(&bytes) {
        population.cache.set(cache_key, payload, population.ttl).await;
    }

    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(bytes))
}
