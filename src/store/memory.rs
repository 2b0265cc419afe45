// 内存实现，测试与本地运行用；过期基于 tokio 时钟，
// 测试里可以用 pause/advance 推进

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{KeyValueStore, StoreError};

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(at) => at <= now,
            None => false,
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn incr_window(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|e| e.expired(now)) {
            entries.remove(key);
        }
        match entries.get_mut(key) {
            Some(entry) => {
                let count = entry.value.parse::<u64>().unwrap_or(0) + 1;
                entry.value = count.to_string();
                Ok(count)
            }
            None => {
                entries.insert(
                    key.to_string(),
                    Entry {
                        value: "1".to_string(),
                        expires_at: Some(now + window),
                    },
                );
                Ok(1)
            }
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if entries.get(key).is_some_and(|e| e.expired(now)) {
            entries.remove(key);
        }
        Ok(entries.get(key).map(|e| e.value.clone()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.remove(key) {
            Some(entry) if !entry.expired(now) => Ok(Some(entry.value)),
            _ => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| !e.expired(now));
        // 只支持与 Redis 用法一致的前缀通配
        let matched = match pattern.strip_suffix('*') {
            Some(prefix) => entries
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect(),
            None => entries
                .keys()
                .filter(|k| k.as_str() == pattern)
                .cloned()
                .collect(),
        };
        Ok(matched)
    }

    async fn ttl(&self, key: &str) -> Result<Option<u64>, StoreError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        let remaining = entries
            .get(key)
            .filter(|e| !e.expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| {
                let secs = at.duration_since(now).as_secs();
                secs.max(1)
            });
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_with_the_clock() {
        let store = MemoryStore::new();
        store
            .set_ex("k", "v", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn incr_window_resets_after_window() {
        let store = MemoryStore::new();
        assert_eq!(
            store
                .incr_window("c", Duration::from_secs(10))
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .incr_window("c", Duration::from_secs(10))
                .await
                .unwrap(),
            2
        );

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(
            store
                .incr_window("c", Duration::from_secs(10))
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn take_removes_the_entry() {
        let store = Arc::new(MemoryStore::new());
        store
            .set_ex("once", "answer", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(store.take("once").await.unwrap().as_deref(), Some("answer"));
        assert_eq!(store.take("once").await.unwrap(), None);
    }
}
