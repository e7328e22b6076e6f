use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::domain::ports::KvStore;

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.expires_at.map(|at| Instant::now() < at).unwrap_or(true)
    }
}

/// In-process stand-in for Redis, used in tests and single-process
/// deployments where a separate kv store isn't worth running.
#[derive(Default)]
pub struct InMemoryKvStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn incr(&self, key: &str, ttl_seconds: Option<u64>) -> Result<u64> {
        let mut entries = self.entries.lock().await;
        let current = entries
            .get(key)
            .filter(|e| e.is_live())
            .and_then(|e| e.value.parse::<u64>().ok())
            .unwrap_or(0);
        let next = current + 1;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: ttl_seconds.map(|s| Instant::now() + Duration::from_secs(s)),
            },
        );
        Ok(next)
    }

    async fn incrbyfloat(&self, key: &str, amount: Decimal, ttl_seconds: Option<u64>) -> Result<Decimal> {
        let mut entries = self.entries.lock().await;
        let current = entries
            .get(key)
            .filter(|e| e.is_live())
            .and_then(|e| Decimal::from_str(&e.value).ok())
            .unwrap_or(Decimal::ZERO);
        let next = current + amount;
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at: ttl_seconds.map(|s| Instant::now() + Duration::from_secs(s)),
            },
        );
        Ok(next)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).filter(|e| e.is_live()).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let entries = self.entries.lock().await;
        Ok(entries.get(key).map(|e| e.is_live()).unwrap_or(false))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_persists_and_increments() {
        let kv = InMemoryKvStore::new();
        assert_eq!(kv.incr("a", None).await.unwrap(), 1);
        assert_eq!(kv.incr("a", None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn set_with_ttl_expires() {
        let kv = InMemoryKvStore::new();
        kv.set_with_ttl("k", "v", 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!kv.exists("k").await.unwrap());
    }

    #[tokio::test]
    async fn set_has_no_ttl() {
        let kv = InMemoryKvStore::new();
        kv.set("k", "v").await.unwrap();
        assert_eq!(kv.get("k").await.unwrap(), Some("v".to_string()));
    }
}
