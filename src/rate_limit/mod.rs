// 限流模块
// 固定窗口计数：原子自增并读取，首次写入时设置窗口过期时间。
// 窗口边界处最多放行 2×limit 个请求，属于已知并接受的固定窗口特性，
// 测试只断言窗口内的保证。

use std::sync::Arc;
use std::time::Duration;

use crate::store::{KeyValueStore, keys};

/// 路由组限流配置
#[derive(Debug, Clone)]
pub struct RateLimitOptions {
    pub limit: u32,
    pub window_seconds: u64,
    pub key_prefix: Option<String>,
}

/// 限流判定结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Rejected { retry_after_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// 自增计数并判定：计数与读取是同一个原子操作，
    /// 并发请求之间不会出现先读后写的竞态。
    /// 存储失败或超时按拒绝处理。
    pub async fn check_and_increment(
        &self,
        client: &str,
        path: &str,
        options: &RateLimitOptions,
    ) -> RateDecision {
        let prefix = options.key_prefix.as_deref().unwrap_or("global");
        let key = keys::rate_limit_key(prefix, client, path);
        let window = Duration::from_secs(options.window_seconds);

        let count = match self.store.incr_window(&key, window).await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!("rate limit store failed, failing closed: {}", e);
                return RateDecision::Rejected {
                    retry_after_secs: options.window_seconds,
                };
            }
        };

        if count > options.limit as u64 {
            // 剩余窗口时间给 Retry-After，取不到就退回整个窗口长度
            let retry_after_secs = self
                .store
                .ttl(&key)
                .await
                .ok()
                .flatten()
                .unwrap_or(options.window_seconds);
            RateDecision::Rejected { retry_after_secs }
        } else {
            RateDecision::Allowed {
                remaining: options.limit - count as u32,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn options(limit: u32, window_seconds: u64) -> RateLimitOptions {
        RateLimitOptions {
            limit,
            window_seconds,
            key_prefix: None,
        }
    }

    #[tokio::test]
    async fn requests_within_the_limit_are_allowed() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let opts = options(5, 60);

        for i in 0..5 {
            let decision = limiter.check_and_increment("1.2.3.4", "/posts", &opts).await;
            assert_eq!(
                decision,
                RateDecision::Allowed { remaining: 4 - i },
                "request {} should be allowed",
                i + 1
            );
        }

        let decision = limiter.check_and_increment("1.2.3.4", "/posts", &opts).await;
        assert!(matches!(decision, RateDecision::Rejected { .. }));
    }

    #[tokio::test]
    async fn rejection_reports_remaining_window_time() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let opts = options(1, 60);

        limiter.check_and_increment("c", "/p", &opts).await;
        match limiter.check_and_increment("c", "/p", &opts).await {
            RateDecision::Rejected { retry_after_secs } => {
                assert!(retry_after_secs >= 1 && retry_after_secs <= 60);
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn counter_resets_after_the_window() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let opts = options(5, 60);

        for _ in 0..5 {
            assert!(
                limiter
                    .check_and_increment("1.2.3.4", "/posts", &opts)
                    .await
                    .is_allowed()
            );
        }
        assert!(
            !limiter
                .check_and_increment("1.2.3.4", "/posts", &opts)
                .await
                .is_allowed()
        );

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(
            limiter
                .check_and_increment("1.2.3.4", "/posts", &opts)
                .await
                .is_allowed()
        );
    }

    #[tokio::test]
    async fn separate_keys_do_not_interfere() {
        let limiter = RateLimiter::new(Arc::new(MemoryStore::new()));
        let opts = options(1, 60);

        assert!(
            limiter
                .check_and_increment("1.2.3.4", "/posts", &opts)
                .await
                .is_allowed()
        );
        assert!(
            limiter
                .check_and_increment("5.6.7.8", "/posts", &opts)
                .await
                .is_allowed()
        );
        assert!(
            limiter
                .check_and_increment("1.2.3.4", "/comments", &opts)
                .await
                .is_allowed()
        );
    }

    #[tokio::test]
    async fn concurrent_requests_admit_exactly_the_limit() {
        let limiter = Arc::new(RateLimiter::new(Arc::new(MemoryStore::new())));
        let opts = options(10, 60);

        let mut handles = Vec::new();
        for _ in 0..50 {
            let limiter = limiter.clone();
            let opts = opts.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .check_and_increment("9.9.9.9", "/posts", &opts)
                    .await
                    .is_allowed()
            }));
        }

        let mut allowed = 0;
        let mut rejected = 0;
        for handle in handles {
            if handle.await.unwrap() {
                allowed += 1;
            } else {
                rejected += 1;
            }
        }

        assert_eq!(allowed, 10);
        assert_eq!(rejected, 40);
    }
}
