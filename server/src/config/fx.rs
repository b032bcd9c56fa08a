//! FX gateway (payout provider) configuration

use std::env;
use std::time::Duration;

/// Connection settings for the external FX payout provider.
#[derive(Debug, Clone)]
pub struct FxGatewayConfig {
    pub base_url: String,
    pub api_key: String,
    /// Hard upper bound on any provider call; a timed-out call is treated
    /// as a gateway error and follows the normal failure path
    pub request_timeout_secs: u64,
    /// Default source currency for quotes
    pub source_currency: String,
}

impl FxGatewayConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env::var("FX_GATEWAY_URL")
                .unwrap_or_else(|_| "https://api.xe-payouts.example".to_string()),
            api_key: env::var("FX_GATEWAY_API_KEY").unwrap_or_default(),
            request_timeout_secs: env::var("FX_GATEWAY_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            source_currency: env::var("LEDGER_CURRENCY").unwrap_or_else(|_| "USD".to_string()),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
