//! In-memory `Rtdb` implementation, used by the collector service in
//! tests and as its only backend today.

use crate::traits::Rtdb;
use async_trait::async_trait;
use bytes::Bytes;
use collector_errors::Result;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct Entry {
    value: Bytes,
    expires_at: Option<Instant>,
}

#[derive(Default)]
pub struct MemoryRtdb {
    kv: DashMap<String, Entry>,
    hashes: DashMap<String, HashMap<String, Bytes>>,
    lists: DashMap<String, Vec<Bytes>>,
    sets: DashMap<String, std::collections::HashSet<String>>,
    /// Messages published per channel, kept for tests to assert on.
    published: RwLock<Vec<(String, String)>>,
}

impl MemoryRtdb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/inspection hook: every `(channel, message)` pair published so far.
    pub fn published_messages(&self) -> Vec<(String, String)> {
        self.published.read().clone()
    }

    fn is_live(entry: &Entry) -> bool {
        match entry.expires_at {
            Some(at) => Instant::now() < at,
            None => true,
        }
    }
}

#[async_trait]
impl Rtdb for MemoryRtdb {
    fn as_any(&self) -> &dyn Any {
        self
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self
            .kv
            .get(key)
            .filter(|e| Self::is_live(e))
            .map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        self.kv.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl_ms: u64) -> Result<()> {
        self.kv.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Some(Instant::now() + Duration::from_millis(ttl_ms)),
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        Ok(self.kv.remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.kv.get(key).is_some_and(|e| Self::is_live(&e)))
    }

    async fn hash_set(&self, key: &str, field: &str, value: Bytes) -> Result<()> {
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        Ok(self
            .hashes
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, Bytes>> {
        Ok(self.hashes.get(key).map(|h| h.clone()).unwrap_or_default())
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<bool> {
        Ok(self
            .hashes
            .get_mut(key)
            .map(|mut h| h.remove(field).is_some())
            .unwrap_or(false))
    }

    async fn list_rpush(&self, key: &str, value: Bytes) -> Result<()> {
        self.lists.entry(key.to_string()).or_default().push(value);
        Ok(())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Bytes>> {
        let Some(list) = self.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let norm = |i: isize| -> isize {
            if i < 0 {
                (len + i).max(0)
            } else {
                i.min(len - 1)
            }
        };
        let (s, e) = (norm(start), norm(stop));
        if s > e {
            return Ok(Vec::new());
        }
        Ok(list[s as usize..=e as usize].to_vec())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<bool> {
        Ok(self
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<u32> {
        self.published
            .write()
            .push((channel.to_string(), message.to_string()));
        Ok(0)
    }

    async fn scan_match(&self, pattern: &str) -> Result<Vec<String>> {
        let regex_pattern = glob_to_regex(pattern);
        let re = regex::Regex::new(&regex_pattern)
            .map_err(|e| collector_errors::CollectorError::Internal(e.to_string()))?;
        Ok(self
            .kv
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| re.is_match(k))
            .collect())
    }

    async fn time_millis(&self) -> Result<i64> {
        Ok(chrono::Utc::now().timestamp_millis())
    }
}

/// Translates a Redis-style glob (`*`, `?`) into an anchored regex.
fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::from("^");
    for segment in pattern.split_inclusive(['*', '?']) {
        let (literal, wildcard) = match segment.chars().last() {
            Some('*') => (&segment[..segment.len() - 1], Some(".*")),
            Some('?') => (&segment[..segment.len() - 1], Some(".")),
            _ => (segment, None),
        };
        out.push_str(&regex::escape(literal));
        if let Some(w) = wildcard {
            out.push_str(w);
        }
    }
    out.push('$');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn kv_roundtrip() {
        let rtdb = MemoryRtdb::new();
        rtdb.set("k", Bytes::from("v")).await.unwrap();
        assert_eq!(rtdb.get("k").await.unwrap(), Some(Bytes::from("v")));
        assert!(rtdb.del("k").await.unwrap());
        assert_eq!(rtdb.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ttl_expiry() {
        let rtdb = MemoryRtdb::new();
        rtdb.set_ex("k", Bytes::from("v"), 1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(rtdb.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn hash_roundtrip() {
        let rtdb = MemoryRtdb::new();
        rtdb.hash_set("h", "f1", Bytes::from("a")).await.unwrap();
        rtdb.hash_set("h", "f2", Bytes::from("b")).await.unwrap();
        let all = rtdb.hash_get_all("h").await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn scan_match_supports_glob_star() {
        let rtdb = MemoryRtdb::new();
        rtdb.set("point:1_point_1:latest", Bytes::from("x"))
            .await
            .unwrap();
        rtdb.set("point:1_point_2:latest", Bytes::from("x"))
            .await
            .unwrap();
        rtdb.set("device:1:meta", Bytes::from("x")).await.unwrap();
        let matched = rtdb.scan_match("point:1_point_*:latest").await.unwrap();
        assert_eq!(matched.len(), 2);
    }

    #[tokio::test]
    async fn publish_records_message() {
        let rtdb = MemoryRtdb::new();
        rtdb.publish("alarms:all", "{}").await.unwrap();
        assert_eq!(rtdb.published_messages().len(), 1);
    }
}
