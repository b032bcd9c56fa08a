//! Platform revenue wallet configuration
//!
//! Fees booked on milestone releases and withdrawals are credited to a
//! dedicated platform wallet so `platform_fee` transactions reconcile
//! against a real ledger account rather than a synthetic counter.

use std::env;

/// Reserved user id owning the platform revenue wallet.
pub const PLATFORM_WALLET_USER: &str = "platform";

/// User id owning the platform revenue wallet (PLATFORM_WALLET_USER env).
pub fn get_platform_wallet_user() -> String {
    env::var("PLATFORM_WALLET_USER").unwrap_or_else(|_| PLATFORM_WALLET_USER.to_string())
}

/// Ledger currency for internal wallets (LEDGER_CURRENCY env, default USD).
pub fn get_ledger_currency() -> String {
    env::var("LEDGER_CURRENCY").unwrap_or_else(|_| "USD".to_string())
}
