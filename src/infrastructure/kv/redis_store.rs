use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use rust_decimal::Decimal;
use std::str::FromStr;
use tokio::sync::Mutex;

use crate::domain::ports::KvStore;

/// Redis-backed implementation of the circuit breaker's counter store. Uses
/// a `ConnectionManager` so a dropped connection reconnects transparently
/// instead of failing every call until the process restarts.
pub struct RedisKvStore {
    conn: Mutex<ConnectionManager>,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let conn = ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn incr(&self, key: &str, ttl_seconds: Option<u64>) -> Result<u64> {
        let mut conn = self.conn.lock().await;
        let value: i64 = conn.incr(key, 1).await.context("redis INCR failed")?;
        if let Some(ttl) = ttl_seconds {
            let _: () = conn.expire(key, ttl as i64).await.context("redis EXPIRE failed")?;
        }
        Ok(value.max(0) as u64)
    }

    async fn incrbyfloat(&self, key: &str, amount: Decimal, ttl_seconds: Option<u64>) -> Result<Decimal> {
        let mut conn = self.conn.lock().await;
        let raw: String = redis::cmd("INCRBYFLOAT")
            .arg(key)
            .arg(amount.to_string())
            .query_async(&mut *conn)
            .await
            .context("redis INCRBYFLOAT failed")?;
        if let Some(ttl) = ttl_seconds {
            let _: () = conn.expire(key, ttl as i64).await.context("redis EXPIRE failed")?;
        }
        Decimal::from_str(&raw).context("redis returned a non-decimal INCRBYFLOAT result")
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.lock().await;
        conn.get(key).await.context("redis GET failed")
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let _: () = conn.set(key, value).await.context("redis SET failed")?;
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let _: () = conn
            .set_ex(key, value, ttl_seconds)
            .await
            .context("redis SETEX failed")?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.lock().await;
        conn.exists(key).await.context("redis EXISTS failed")
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.lock().await;
        let _: () = conn.del(key).await.context("redis DEL failed")?;
        Ok(())
    }
}
