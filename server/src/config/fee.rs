//! Platform fee configuration
//!
//! Fees are expressed in basis points (100 bps = 1%) and are configurable
//! via environment variables so staging and production can diverge without
//! a rebuild.

use std::env;

use serde::{Deserialize, Serialize};

/// Default platform fee on milestone releases (1000 bps = 10%).
///
/// Override via RELEASE_FEE_BPS. Withdrawal fees are not configured here;
/// they come from the provider quote and are recorded on the contract.
pub const DEFAULT_RELEASE_FEE_BPS: u64 = 1_000;

/// Maximum configurable fee (5000 bps = 50%).
/// Above this, the configuration is almost certainly a typo.
pub const MAX_FEE_BPS: u64 = 5_000;

/// Fee policy injected into the fee calculator.
///
/// Carried as plain data so release, completion, and dispute-refund paths
/// all compute against the same numbers and reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeePolicy {
    /// Fee in basis points (100 = 1%)
    pub fee_bps: u64,
    /// Floor for the fee in minor units; 0 disables the floor
    pub min_fee_minor: i64,
}

impl FeePolicy {
    pub fn release() -> Self {
        Self {
            fee_bps: get_release_fee_bps(),
            min_fee_minor: get_min_fee_minor(),
        }
    }
}

fn read_bps(var: &str, default: u64) -> u64 {
    env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(|bps: u64| {
            if bps > MAX_FEE_BPS {
                tracing::warn!(var = var, bps = bps, max = MAX_FEE_BPS, "fee above maximum, clamping");
                MAX_FEE_BPS
            } else {
                bps
            }
        })
        .unwrap_or(default)
}

/// Fee in basis points applied to milestone releases.
pub fn get_release_fee_bps() -> u64 {
    read_bps("RELEASE_FEE_BPS", DEFAULT_RELEASE_FEE_BPS)
}

/// Minimum fee in minor units (MIN_FEE_MINOR, default 0).
pub fn get_min_fee_minor() -> i64 {
    env::var("MIN_FEE_MINOR")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}
