use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::{Role, TokenService};
use crate::rate_limit::{RateDecision, RateLimitOptions, RateLimiter};
use crate::response_cache::{CacheOptions, ResponseCache};

use super::{PipelineStage, RejectReason, RequestContext, StageOutcome};

/// 限流阶段：按客户端与路径计数，超限短路
pub struct RateLimitStage {
    limiter: Arc<RateLimiter>,
    options: RateLimitOptions,
}

impl RateLimitStage {
    pub fn new(limiter: Arc<RateLimiter>, options: RateLimitOptions) -> Self {
        Self { limiter, options }
    }
}

#[async_trait]
impl PipelineStage for RateLimitStage {
    async fn process(&self, ctx: &mut RequestContext) -> StageOutcome {
        let decision = self
            .limiter
            .check_and_increment(&ctx.client_ip, &ctx.path, &self.options)
            .await;
        match decision {
            RateDecision::Allowed { .. } => StageOutcome::Proceed,
            RateDecision::Rejected { retry_after_secs } => {
                StageOutcome::Reject(RejectReason::RateLimited { retry_after_secs })
            }
        }
    }
}

/// 缓存查询阶段：只读请求推导缓存键，命中即短路；
/// 未命中时把键留在上下文里，处理成功后回填
pub struct CacheLookupStage {
    cache: Arc<ResponseCache>,
    options: CacheOptions,
}

impl CacheLookupStage {
    pub fn new(cache: Arc<ResponseCache>, options: CacheOptions) -> Self {
        Self { cache, options }
    }
}

#[async_trait]
impl PipelineStage for CacheLookupStage {
    async fn process(&self, ctx: &mut RequestContext) -> StageOutcome {
        if self.options.skip_cache || ctx.method != "GET" {
            return StageOutcome::Proceed;
        }

        let key = ResponseCache::key_for(
            &self.options.key_prefix,
            &ctx.method,
            &ctx.path,
            ctx.query.as_deref(),
        );
        ctx.cache_key = Some(key.clone());

        match self.cache.get(&key).await {
            Some(cached) => StageOutcome::ServeCached(cached),
            None => StageOutcome::Proceed,
        }
    }
}

/// 认证阶段：校验凭证并检查角色是否足够
pub struct AuthStage {
    tokens: Arc<TokenService>,
    min_role: Role,
}

impl AuthStage {
    pub fn new(tokens: Arc<TokenService>, min_role: Role) -> Self {
        Self { tokens, min_role }
    }
}

#[async_trait]
impl PipelineStage for AuthStage {
    async fn process(&self, ctx: &mut RequestContext) -> StageOutcome {
        let token = match ctx.bearer_token.as_deref() {
            Some(token) => token,
            None => return StageOutcome::Reject(RejectReason::MissingToken),
        };

        match self.tokens.verify(token) {
            Ok(claims) if claims.role.is_at_least(self.min_role) => {
                ctx.claims = Some(claims);
                StageOutcome::Proceed
            }
            Ok(_) => StageOutcome::Reject(RejectReason::Forbidden),
            Err(fault) => StageOutcome::Reject(RejectReason::Unauthenticated(fault)),
        }
    }
}
