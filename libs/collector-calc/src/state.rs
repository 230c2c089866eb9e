//! State storage for stateful builtin functions (`integrate`, `moving_avg`,
//! `rate_of_change`). Formulas themselves are stateless DAG nodes; these
//! functions are the one place a scan cycle's result depends on history.

use async_trait::async_trait;
use collector_errors::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-process state store. The collector service wires this up today;
/// a cache-backed implementation can satisfy the same trait if stateful
/// function state ever needs to survive a process restart.
#[derive(Default)]
pub struct MemoryStateStore {
    data: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut data = self.data.write().await;
        data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut data = self.data.write().await;
        data.remove(key);
        Ok(())
    }
}

/// No persistence; any formula using a stateful function always sees a
/// first call. Useful for one-shot evaluation (e.g. ON_DEMAND preview).
pub struct NullStateStore;

#[async_trait]
impl StateStore for NullStateStore {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &[u8]) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrateState {
    pub last_ts: f64,
    pub accumulated: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingAvgState {
    pub values: Vec<f64>,
    pub position: usize,
    pub count: usize,
}

impl MovingAvgState {
    pub fn new(window_size: usize) -> Self {
        Self {
            values: vec![0.0; window_size.max(1)],
            position: 0,
            count: 0,
        }
    }

    pub fn add(&mut self, value: f64) -> f64 {
        self.values[self.position] = value;
        self.position = (self.position + 1) % self.values.len();
        if self.count < self.values.len() {
            self.count += 1;
        }
        self.average()
    }

    pub fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let sum: f64 = self.values.iter().take(self.count).sum();
        sum / self.count as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateOfChangeState {
    pub last_ts: f64,
    pub last_value: f64,
}

/// `calc:state:{context}:{func}:{var}` - `context` is the virtual point
/// or alarm rule id driving this evaluation.
pub fn state_key(context: &str, func: &str, var: &str) -> String {
    format!("calc:state:{context}:{func}:{var}")
}

pub type SharedStateStore = Arc<dyn StateStore>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_avg_overwrites_oldest() {
        let mut s = MovingAvgState::new(3);
        assert_eq!(s.add(10.0), 10.0);
        assert_eq!(s.add(20.0), 15.0);
        assert_eq!(s.add(30.0), 20.0);
        assert_eq!(s.add(40.0), 30.0); // overwrites the 10
    }

    #[tokio::test]
    async fn memory_store_roundtrips() {
        let store = MemoryStateStore::new();
        store.set("k", b"v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
