// 共享存储模块
// 进程级唯一的 Redis 客户端，以及限流、验证码、响应缓存共用的原子操作

pub mod keys;
pub mod memory;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient, aio::MultiplexedConnection};
use tokio::sync::OnceCell;
use tokio::time::timeout;

pub use memory::MemoryStore;

#[derive(Debug)]
pub enum StoreError {
    /// 存储调用超时
    Timeout,
    /// 存储不可用或命令失败
    Unavailable(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Timeout => write!(f, "store call timed out"),
            StoreError::Unavailable(msg) => write!(f, "store unavailable: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

/// 共享键值存储的原子操作集合
///
/// 限流计数、验证码记录、响应缓存都只依赖这里的原语；
/// 测试用 `MemoryStore` 替换 Redis 实现。
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// 原子自增并返回自增后的值；首次写入时设置过期时间为 window
    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// 原子读取并删除（GETDEL），不存在时返回 None
    async fn take(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// 按模式列出键（仅支持前缀通配，如 `resp_cache:post:*`）
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// 键的剩余存活秒数，不存在或无过期时间时返回 None
    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError>;
}

/// Redis 实现，进程启动时构造一次，所有组件共享；
/// 多路复用连接首次使用时建立，之后全部请求复用
pub struct SharedStore {
    client: Arc<RedisClient>,
    connection: OnceCell<MultiplexedConnection>,
    op_timeout: Duration,
}

impl SharedStore {
    pub fn new(client: RedisClient, op_timeout: Duration) -> Self {
        Self {
            client: Arc::new(client),
            connection: OnceCell::new(),
            op_timeout,
        }
    }

    pub fn connect(redis_url: &str, op_timeout: Duration) -> Result<Self, redis::RedisError> {
        let client = RedisClient::open(redis_url)?;
        Ok(Self::new(client, op_timeout))
    }

    // 建立失败不缓存，下次调用重试
    async fn connection(&self) -> redis::RedisResult<MultiplexedConnection> {
        let conn = self
            .connection
            .get_or_try_init(|| async { self.client.get_multiplexed_async_connection().await })
            .await?;
        Ok(conn.clone())
    }

    // 每个操作整体套一层超时，等待期间不持有任何进程内锁
    async fn run<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match timeout(self.op_timeout, op).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Unavailable(e.to_string())),
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

#[async_trait]
impl KeyValueStore for SharedStore {
    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        self.run(async {
            let mut conn = self.connection().await?;
            let count: u64 = conn.incr(key, 1).await?;
            if count == 1 {
                // 窗口首个请求，设置计数器过期时间
                let _: () = conn.expire(key, window.as_secs() as i64).await?;
            }
            Ok(count)
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.run(async {
            let mut conn = self.connection().await?;
            let value: Option<String> = conn.get(key).await?;
            Ok(value)
        })
        .await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.run(async {
            let mut conn = self.connection().await?;
            let _: () = conn.set_ex(key, value, ttl.as_secs()).await?;
            Ok(())
        })
        .await
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.run(async {
            let mut conn = self.connection().await?;
            let value: Option<String> = redis::cmd("GETDEL").arg(key).query_async(&mut conn).await?;
            Ok(value)
        })
        .await
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.run(async {
            let mut conn = self.connection().await?;
            let _: () = conn.del(key).await?;
            Ok(())
        })
        .await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.run(async {
            let mut conn = self.connection().await?;
            let keys: Vec<String> = conn.keys(pattern).await?;
            Ok(keys)
        })
        .await
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError> {
        self.run(async {
            let mut conn = self.connection().await?;
            // -2 键不存在，-1 无过期时间
            let remaining: i64 = conn.ttl(key).await?;
            Ok(if remaining > 0 {
                Some(remaining as u64)
            } else {
                None
            })
        })
        .await
    }
}
