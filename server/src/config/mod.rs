//! Configuration modules for the settlement server

pub mod fee;
pub mod fx;
pub mod platform;
pub mod watchdog;

pub use fee::{get_min_fee_minor, get_release_fee_bps, FeePolicy, DEFAULT_RELEASE_FEE_BPS};
pub use fx::FxGatewayConfig;
pub use platform::{get_ledger_currency, get_platform_wallet_user, PLATFORM_WALLET_USER};
pub use watchdog::WatchdogConfig;
