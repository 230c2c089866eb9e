//! Reconnect backoff policy for a `DeviceWorker`: exponential backoff
//! with jitter, tracked per device so concurrent reconnects don't all
//! retry in lockstep.

use collector_model::device::DeviceSettings;
use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
    Failed,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ReconnectStats {
    pub total_attempts: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub consecutive_failures: u32,
}

/// Tracks one device's reconnect attempts and computes the next delay.
pub struct ReconnectState {
    settings: DeviceSettings,
    attempt: u32,
    connection_state: ConnectionState,
    stats: ReconnectStats,
}

impl ReconnectState {
    pub fn new(settings: DeviceSettings) -> Self {
        Self {
            settings,
            attempt: 0,
            connection_state: ConnectionState::Disconnected,
            stats: ReconnectStats::default(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection_state
    }

    pub fn stats(&self) -> ReconnectStats {
        self.stats
    }

    pub fn on_connected(&mut self) {
        self.attempt = 0;
        self.connection_state = ConnectionState::Connected;
        self.stats.total_successes += 1;
        self.stats.consecutive_failures = 0;
    }

    /// Records a failed attempt and returns the delay to wait before the
    /// next one, or `None` if the retry budget is exhausted
    /// (`max_retry_count == 0` means unbounded).
    pub fn on_failed(&mut self) -> Option<Duration> {
        self.stats.total_attempts += 1;
        self.stats.total_failures += 1;
        self.stats.consecutive_failures += 1;

        if self.settings.retries_exhausted(self.attempt) {
            self.connection_state = ConnectionState::Failed;
            return None;
        }

        let base_delay_ms = self.settings.backoff_delay_ms(self.attempt);
        self.attempt += 1;
        self.connection_state = ConnectionState::Reconnecting;
        Some(jittered(base_delay_ms))
    }
}

/// Applies +/-25% jitter so multiple devices reconnecting after a shared
/// network blip don't all retry on the exact same tick.
fn jittered(base_ms: u64) -> Duration {
    let jitter_fraction = rand::thread_rng().gen_range(-0.25..=0.25);
    let jittered_ms = (base_ms as f64) * (1.0 + jitter_fraction);
    Duration::from_millis(jittered_ms.max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> DeviceSettings {
        DeviceSettings {
            retry_interval_ms: 1000,
            backoff_multiplier: 2.0,
            max_backoff_time_ms: 10_000,
            max_retry_count: 3,
            ..Default::default()
        }
    }

    #[test]
    fn success_resets_attempt_counter() {
        let mut state = ReconnectState::new(settings());
        state.on_failed();
        state.on_failed();
        state.on_connected();
        assert_eq!(state.connection_state(), ConnectionState::Connected);
        assert_eq!(state.stats().consecutive_failures, 0);
    }

    #[test]
    fn exhausted_retries_transition_to_failed() {
        let mut state = ReconnectState::new(settings());
        assert!(state.on_failed().is_some());
        assert!(state.on_failed().is_some());
        assert!(state.on_failed().is_some());
        assert!(state.on_failed().is_none());
        assert_eq!(state.connection_state(), ConnectionState::Failed);
    }

    #[test]
    fn unbounded_retries_never_exhaust() {
        let mut unbounded = settings();
        unbounded.max_retry_count = 0;
        let mut state = ReconnectState::new(unbounded);
        for _ in 0..50 {
            assert!(state.on_failed().is_some());
        }
    }

    #[test]
    fn delay_stays_within_jitter_band_of_backoff() {
        let mut state = ReconnectState::new(settings());
        let delay = state.on_failed().unwrap();
        // attempt 0 => base 1000ms, jitter +/-25% => [750, 1250]
        assert!(delay.as_millis() >= 750 && delay.as_millis() <= 1250);
    }
}
