//! Expiry watchdog configuration

use std::env;
use std::time::Duration;

/// Configuration for the withdrawal-contract expiry sweep.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// How often the sweep polls for expired contracts
    pub poll_interval_secs: u64,
    /// Idempotency-key retention window
    pub idempotency_ttl_secs: u64,
}

impl WatchdogConfig {
    pub fn from_env() -> Self {
        let poll_interval_secs = env::var("WATCHDOG_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(30);

        let idempotency_ttl_secs = env::var("IDEMPOTENCY_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(86_400);

        Self {
            poll_interval_secs,
            idempotency_ttl_secs,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            idempotency_ttl_secs: 86_400,
        }
    }
}
