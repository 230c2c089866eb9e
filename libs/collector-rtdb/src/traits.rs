//! The `Rtdb` trait: everything the collector needs from its hot cache.
//!
//! A production deployment would back this with Redis; this workspace
//! ships only the in-memory implementation (a concrete
//! external stores are out of scope). The trait boundary is what matters -
//! `CacheWriter` and `AlarmEngine` depend on `Arc<dyn Rtdb>`, never on a
//! concrete backend.

use async_trait::async_trait;
use bytes::Bytes;
use collector_errors::Result;
use std::any::Any;
use std::collections::HashMap;

#[async_trait]
pub trait Rtdb: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;

    // ---- key-value ----
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;
    async fn set_ex(&self, key: &str, value: Bytes, ttl_ms: u64) -> Result<()>;
    async fn del(&self, key: &str) -> Result<bool>;
    async fn exists(&self, key: &str) -> Result<bool>;

    // ---- hash ----
    async fn hash_set(&self, key: &str, field: &str, value: Bytes) -> Result<()>;
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Bytes>>;
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Bytes>>;
    async fn hash_del(&self, key: &str, field: &str) -> Result<bool>;

    // ---- list ----
    async fn list_rpush(&self, key: &str, value: Bytes) -> Result<()>;
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Bytes>>;

    // ---- set ----
    async fn sadd(&self, key: &str, member: &str) -> Result<bool>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    // ---- pub/sub ----
    /// Returns the number of subscribers the message was delivered to.
    /// `MemoryRtdb` has no subscribers and always returns 0.
    async fn publish(&self, channel: &str, message: &str) -> Result<u32>;

    // ---- scanning ----
    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>>;

    async fn time_millis(&self) -> Result<i64>;

    // ---- domain helpers (default-implemented over the primitives above) ----

    /// Write a JSON value at `key` and publish it on `channel` in one
    /// call, used by `CacheWriter`/`AlarmEngine` for the cache-then-notify
    /// pattern.
    async fn set_and_publish(&self, key: &str, channel: &str, value: &serde_json::Value) -> Result<()> {
        let bytes = Bytes::from(serde_json::to_vec(value)?);
        self.set(key, bytes).await?;
        self.publish(channel, &value.to_string()).await?;
        Ok(())
    }

    async fn get_json(&self, key: &str) -> Result<Option<serde_json::Value>> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
