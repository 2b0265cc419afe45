// 响应缓存模块
// 只读路由的成功响应按确定性键缓存；缓存是纯优化，
// 存储异常一律当未命中处理，绝不影响请求结果

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::store::{KeyValueStore, keys};

/// 路由组缓存配置
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub ttl_seconds: u64,
    pub key_prefix: String,
    pub skip_cache: bool,
}

/// 缓存的响应记录
#[derive(Debug, Serialize, Deserialize)]
pub struct CachedResponse {
    /// 序列化后的响应体
    pub payload: String,
    pub created_at: i64,
}

pub struct ResponseCache {
    store: Arc<dyn KeyValueStore>,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// 由方法、路径、查询串推导确定性缓存键
    pub fn key_for(prefix: &str, method: &str, path: &str, query: Option<&str>) -> String {
        let input = format!("{}:{}?{}", method, path, query.unwrap_or(""));
        let digest = Sha256::digest(input.as_bytes());
        keys::response_cache_key(prefix, &format!("{:x}", digest))
    }

    /// 读取缓存；未命中不是错误，存储异常也按未命中处理
    pub async fn get(&self, key: &str) -> Option<CachedResponse> {
        let json = match self.store.get(key).await {
            Ok(Some(json)) => json,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("response cache read failed, treating as miss: {}", e);
                return None;
            }
        };
        match serde_json::from_str(&json) {
            Ok(cached) => Some(cached),
            Err(e) => {
                tracing::warn!("cached response deserialization failed: {}", e);
                None
            }
        }
    }

    /// 写入缓存；只应在只读路由的成功响应上调用
    pub async fn set(&self, key: &str, payload: &str, ttl: Duration) {
        let cached = CachedResponse {
            payload: payload.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        };
        let json = match serde_json::to_string(&cached) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!("cached response serialization failed: {}", e);
                return;
            }
        };
        if let Err(e) = self.store.set_ex(key, &json, ttl).await {
            tracing::warn!("response cache write failed: {}", e);
        }
    }

    /// 删除指定缓存键；写操作的处理器负责枚举受影响的键
    pub async fn invalidate(&self, cache_keys: &[String]) {
        for key in cache_keys {
            if let Err(e) = self.store.del(key).await {
                tracing::warn!("cache invalidation failed for {}: {}", key, e);
            }
        }
    }

    /// 删除某个前缀下的全部缓存键
    pub async fn invalidate_prefix(&self, prefix: &str) {
        let pattern = keys::response_cache_pattern(prefix);
        let matched = match self.store.keys(&pattern).await {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!("cache key listing failed for {}: {}", pattern, e);
                return;
            }
        };
        self.invalidate(&matched).await;
    }
}
