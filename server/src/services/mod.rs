//! Business logic services
//!
//! Services own the orchestration: they compose the guarded model updates
//! into whole settlement operations, each inside one SQLite transaction, and
//! talk to the FX provider at the seams where money leaves the platform.

pub mod escrow;
pub mod expiry_watchdog;
pub mod fees;
pub mod fx_gateway;
pub mod notifier;
pub mod wallet;
pub mod withdrawal;

pub use escrow::EscrowManager;
pub use expiry_watchdog::ExpiryWatchdog;
pub use fees::FeeCalculator;
pub use fx_gateway::{FxGateway, FxQuote, PayoutConfirmation, RecipientDetails, XeHttpGateway};
pub use notifier::Notifier;
pub use wallet::WalletService;
pub use withdrawal::WithdrawalContractManager;
