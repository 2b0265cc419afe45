// 请求管道模块
// 把限流、缓存查询、认证编排成显式的有序阶段列表，
// 每个阶段返回带类型的结果（放行 / 短路拒绝 / 命中缓存），
// 而不是靠嵌套包装和抛错来控制流程

pub mod stages;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::auth::{Claims, Role, TokenFault, TokenService};
use crate::error::{AppError, ErrorTranslator};
use crate::rate_limit::{RateLimitOptions, RateLimiter};
use crate::response_cache::{CacheOptions, CachedResponse, ResponseCache};

pub use stages::{AuthStage, CacheLookupStage, RateLimitStage};

/// 一次请求在管道各阶段之间传递的上下文
#[derive(Debug)]
pub struct RequestContext {
    pub method: String,
    pub path: String,
    pub query: Option<String>,
    pub client_ip: String,
    pub bearer_token: Option<String>,
    /// 认证阶段通过后填入
    pub claims: Option<Claims>,
    /// 缓存阶段为可缓存请求推导出的键，处理成功后回填缓存用
    pub cache_key: Option<String>,
}

impl RequestContext {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        query: Option<String>,
        client_ip: impl Into<String>,
        bearer_token: Option<String>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            query,
            client_ip: client_ip.into(),
            bearer_token,
            claims: None,
            cache_key: None,
        }
    }
}

/// 阶段短路拒绝的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    RateLimited { retry_after_secs: u64 },
    MissingToken,
    Unauthenticated(TokenFault),
    Forbidden,
}

impl From<RejectReason> for AppError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::RateLimited { retry_after_secs } => {
                AppError::RateLimitExceeded { retry_after_secs }
            }
            RejectReason::MissingToken => AppError::InvalidToken(TokenFault::Malformed),
            RejectReason::Unauthenticated(fault) => AppError::InvalidToken(fault),
            RejectReason::Forbidden => AppError::Forbidden,
        }
    }
}

/// 阶段处理结果
#[derive(Debug)]
pub enum StageOutcome {
    /// 继续下一阶段（或进入业务处理器）
    Proceed,
    /// 命中缓存，直接返回缓存的响应
    ServeCached(CachedResponse),
    /// 短路拒绝
    Reject(RejectReason),
}

/// 所有阶段实现的统一接口：处理上下文，可能短路
#[async_trait]
pub trait PipelineStage: Send + Sync {
    async fn process(&self, ctx: &mut RequestContext) -> StageOutcome;
}

/// 处理成功后回填缓存所需的句柄
pub struct CachePopulation {
    pub cache: Arc<ResponseCache>,
    pub ttl: Duration,
}

/// 按固定顺序组合各阶段；路由组按需选装任意子集
#[derive(Default)]
pub struct RequestPipeline {
    stages: Vec<Arc<dyn PipelineStage>>,
    cache_population: Option<CachePopulation>,
    translator: ErrorTranslator,
}

impl RequestPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rate_limit(mut self, limiter: Arc<RateLimiter>, options: RateLimitOptions) -> Self {
        self.stages.push(Arc::new(RateLimitStage::new(limiter, options)));
        self
    }

    pub fn with_cache(mut self, cache: Arc<ResponseCache>, options: CacheOptions) -> Self {
        if !options.skip_cache {
            self.cache_population = Some(CachePopulation {
                cache: cache.clone(),
                ttl: Duration::from_secs(options.ttl_seconds),
            });
        }
        self.stages.push(Arc::new(CacheLookupStage::new(cache, options)));
        self
    }

    pub fn with_auth(mut self, tokens: Arc<TokenService>, min_role: Role) -> Self {
        self.stages.push(Arc::new(AuthStage::new(tokens, min_role)));
        self
    }

    pub fn with_translator(mut self, translator: ErrorTranslator) -> Self {
        self.translator = translator;
        self
    }

    /// 依次运行各阶段，返回第一个非放行的结果
    pub async fn run(&self, ctx: &mut RequestContext) -> StageOutcome {
        for stage in &self.stages {
            match stage.process(ctx).await {
                StageOutcome::Proceed => continue,
                outcome => return outcome,
            }
        }
        StageOutcome::Proceed
    }

    pub fn cache_population(&self) -> Option<&CachePopulation> {
        self.cache_population.as_ref()
    }

    pub fn translator(&self) -> &ErrorTranslator {
        &self.translator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ctx(method: &str, path: &str, token: Option<&str>) -> RequestContext {
        RequestContext::new(
            method,
            path,
            None,
            "1.2.3.4",
            token.map(str::to_string),
        )
    }

    fn tokens() -> Arc<TokenService> {
        Arc::new(TokenService::new(
            "test-secret".to_string(),
            Duration::from_secs(3600),
        ))
    }

    #[tokio::test]
    async fn empty_pipeline_proceeds() {
        let pipeline = RequestPipeline::new();
        let mut ctx = ctx("GET", "/posts", None);
        assert!(matches!(
            pipeline.run(&mut ctx).await,
            StageOutcome::Proceed
        ));
    }

    #[tokio::test]
    async fn rate_limit_rejects_before_auth_runs() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = RequestPipeline::new()
            .with_rate_limit(
                Arc::new(RateLimiter::new(store)),
                RateLimitOptions {
                    limit: 1,
                    window_seconds: 60,
                    key_prefix: None,
                },
            )
            .with_auth(tokens(), Role::User);

        // 第一个请求通过限流、死在认证上
        let mut first = ctx("GET", "/posts", None);
        assert!(matches!(
            pipeline.run(&mut first).await,
            StageOutcome::Reject(RejectReason::MissingToken)
        ));

        // 第二个请求在限流阶段就被短路，认证不再参与
        let mut second = ctx("GET", "/posts", None);
        assert!(matches!(
            pipeline.run(&mut second).await,
            StageOutcome::Reject(RejectReason::RateLimited { .. })
        ));
    }

    #[tokio::test]
    async fn cache_hit_short_circuits() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(ResponseCache::new(store));
        let options = CacheOptions {
            ttl_seconds: 60,
            key_prefix: "post".to_string(),
            skip_cache: false,
        };

        let key = ResponseCache::key_for("post", "GET", "/posts/detail", None);
        cache.set(&key, "cached-body", Duration::from_secs(60)).await;

        let pipeline = RequestPipeline::new().with_cache(cache, options);
        let mut ctx = ctx("GET", "/posts/detail", None);
        match pipeline.run(&mut ctx).await {
            StageOutcome::ServeCached(cached) => assert_eq!(cached.payload, "cached-body"),
            other => panic!("expected cache hit, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn cache_miss_records_the_key_for_population() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(ResponseCache::new(store));
        let pipeline = RequestPipeline::new().with_cache(
            cache,
            CacheOptions {
                ttl_seconds: 60,
                key_prefix: "post".to_string(),
                skip_cache: false,
            },
        );

        let mut ctx = ctx("GET", "/posts/detail", None);
        assert!(matches!(pipeline.run(&mut ctx).await, StageOutcome::Proceed));
        assert!(ctx.cache_key.is_some());
        assert!(pipeline.cache_population().is_some());
    }

    #[tokio::test]
    async fn skip_cache_bypasses_lookup_and_population() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(ResponseCache::new(store));
        let pipeline = RequestPipeline::new().with_cache(
            cache,
            CacheOptions {
                ttl_seconds: 60,
                key_prefix: "post".to_string(),
                skip_cache: true,
            },
        );

        let mut ctx = ctx("GET", "/posts/detail", None);
        assert!(matches!(pipeline.run(&mut ctx).await, StageOutcome::Proceed));
        assert!(ctx.cache_key.is_none());
        assert!(pipeline.cache_population().is_none());
    }

    #[tokio::test]
    async fn custom_translator_applies_to_rejections() {
        use crate::error::AppErrorKind;
        use axum::http::StatusCode;

        let pipeline = RequestPipeline::new().with_translator(ErrorTranslator::new().with_rule(
            AppErrorKind::RateLimited,
            StatusCode::SERVICE_UNAVAILABLE,
            "服务繁忙，稍后再试",
        ));

        let response = pipeline.translator().translate(&AppError::RateLimitExceeded {
            retry_after_secs: 5,
        });
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn auth_fills_claims_on_success() {
        let tokens = tokens();
        let (token, _) = tokens
            .issue("alice", Role::User, Duration::from_secs(3600))
            .unwrap();
        let pipeline = RequestPipeline::new().with_auth(tokens, Role::User);

        let mut ctx = ctx("GET", "/posts", Some(&token));
        assert!(matches!(pipeline.run(&mut ctx).await, StageOutcome::Proceed));
        assert_eq!(ctx.claims.as_ref().unwrap().sub, "alice");
    }

    #[tokio::test]
    async fn auth_rejects_bad_tokens_and_low_roles() {
        let tokens = tokens();
        let pipeline = RequestPipeline::new().with_auth(tokens.clone(), Role::Admin);

        let mut missing = ctx("GET", "/admin", None);
        assert!(matches!(
            pipeline.run(&mut missing).await,
            StageOutcome::Reject(RejectReason::MissingToken)
        ));

        let mut garbage = ctx("GET", "/admin", Some("not-a-token"));
        assert!(matches!(
            pipeline.run(&mut garbage).await,
            StageOutcome::Reject(RejectReason::Unauthenticated(TokenFault::Malformed))
        ));

        let (user_token, _) = tokens
            .issue("bob", Role::User, Duration::from_secs(3600))
            .unwrap();
        let mut low_role = ctx("GET", "/admin", Some(&user_token));
        assert!(matches!(
            pipeline.run(&mut low_role).await,
            StageOutcome::Reject(RejectReason::Forbidden)
        ));
    }
}
