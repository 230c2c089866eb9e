//! Built-in formula functions: stateful (`integrate`, `moving_avg`,
//! `rate_of_change`) and stateless (`scale`, `clamp`, `abs`, `min`, `max`,
//! `round`, `sign`).

use crate::state::{state_key, IntegrateState, MovingAvgState, RateOfChangeState, SharedStateStore};
use chrono::Utc;
use tracing::debug;

pub struct BuiltinFunctions {
    state_store: SharedStateStore,
    context: String,
}

impl BuiltinFunctions {
    pub fn new(state_store: SharedStateStore, context: impl Into<String>) -> Self {
        Self {
            state_store,
            context: context.into(),
        }
    }

    /// `accumulated += value * dt * unit_factor`; first call seeds the
    /// clock and returns 0.
    pub async fn integrate(
        &self,
        var_name: &str,
        value: f64,
        unit_factor: f64,
    ) -> collector_errors::Result<f64> {
        let key = state_key(&self.context, "integrate", var_name);
        let now = Utc::now().timestamp() as f64;

        let state = if let Some(data) = self.state_store.get(&key).await? {
            serde_json::from_slice::<IntegrateState>(&data)?
        } else {
            let initial = IntegrateState {
                last_ts: now,
                accumulated: 0.0,
            };
            self.state_store
                .set(&key, &serde_json::to_vec(&initial)?)
                .await?;
            return Ok(0.0);
        };

        let dt = now - state.last_ts;
        if dt <= 0.0 {
            return Ok(state.accumulated);
        }

        let accumulated = state.accumulated + value * dt * unit_factor;
        debug!(var = var_name, value, dt, accumulated, "integrate");

        let new_state = IntegrateState {
            last_ts: now,
            accumulated,
        };
        self.state_store
            .set(&key, &serde_json::to_vec(&new_state)?)
            .await?;
        Ok(accumulated)
    }

    pub async fn moving_avg(
        &self,
        var_name: &str,
        value: f64,
        window: usize,
    ) -> collector_errors::Result<f64> {
        let key = state_key(&self.context, "moving_avg", var_name);

        let mut state = if let Some(data) = self.state_store.get(&key).await? {
            let s: MovingAvgState = serde_json::from_slice(&data)?;
            if s.values.len() != window.max(1) {
                MovingAvgState::new(window)
            } else {
                s
            }
        } else {
            MovingAvgState::new(window)
        };

        let avg = state.add(value);
        debug!(var = var_name, value, window, avg, "moving_avg");
        self.state_store
            .set(&key, &serde_json::to_vec(&state)?)
            .await?;
        Ok(avg)
    }

    /// `dv/dt`; first call seeds the clock and returns 0.
    pub async fn rate_of_change(&self, var_name: &str, value: f64) -> collector_errors::Result<f64> {
        let key = state_key(&self.context, "rate", var_name);
        let now = Utc::now().timestamp() as f64;

        let state = if let Some(data) = self.state_store.get(&key).await? {
            serde_json::from_slice::<RateOfChangeState>(&data)?
        } else {
            let initial = RateOfChangeState {
                last_ts: now,
                last_value: value,
            };
            self.state_store
                .set(&key, &serde_json::to_vec(&initial)?)
                .await?;
            return Ok(0.0);
        };

        let dt = now - state.last_ts;
        let rate = if dt > 0.0 {
            (value - state.last_value) / dt
        } else {
            0.0
        };
        debug!(var = var_name, value, dt, rate, "rate_of_change");

        let new_state = RateOfChangeState {
            last_ts: now,
            last_value: value,
        };
        self.state_store
            .set(&key, &serde_json::to_vec(&new_state)?)
            .await?;
        Ok(rate)
    }
}

pub fn scale(value: f64, factor: f64) -> f64 {
    value * factor
}

pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.clamp(min, max)
}

pub fn abs(value: f64) -> f64 {
    value.abs()
}

pub fn min(a: f64, b: f64) -> f64 {
    a.min(b)
}

pub fn max(a: f64, b: f64) -> f64 {
    a.max(b)
}

pub fn round(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

pub fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;
    use std::sync::Arc;

    #[test]
    fn stateless_functions() {
        assert_eq!(scale(100.0, 0.5), 50.0);
        assert_eq!(clamp(150.0, 0.0, 100.0), 100.0);
        assert_eq!(round(3.14159, 2), 3.14);
        assert_eq!(sign(-4.0), -1.0);
    }

    #[tokio::test]
    async fn integrate_first_call_returns_zero() {
        let store = Arc::new(MemoryStateStore::new());
        let funcs = BuiltinFunctions::new(store, "test");
        assert_eq!(funcs.integrate("power", 1000.0, 1.0).await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn moving_avg_accumulates() {
        let store = Arc::new(MemoryStateStore::new());
        let funcs = BuiltinFunctions::new(store, "test");
        funcs.moving_avg("t", 10.0, 3).await.unwrap();
        funcs.moving_avg("t", 20.0, 3).await.unwrap();
        let avg = funcs.moving_avg("t", 30.0, 3).await.unwrap();
        assert_eq!(avg, 20.0);
    }
}
