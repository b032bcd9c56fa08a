//! Escrow and withdrawal-settlement engine for the GigLedger marketplace
//!
//! Holds client funds for a project, releases them to the freelancer per
//! milestone with platform fees booked, and converts wallet balance into
//! external bank payouts through a third-party FX provider.

use std::sync::Arc;

use crate::config::{FeePolicy, WatchdogConfig};
use crate::db::DbPool;
use crate::services::fx_gateway::FxGateway;
use crate::services::{
    EscrowManager, ExpiryWatchdog, FeeCalculator, Notifier, WalletService,
    WithdrawalContractManager,
};

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod schema;
pub mod services;
pub mod telemetry;

/// Shared application state handed to every handler.
pub struct AppState {
    pub pool: Arc<DbPool>,
    pub wallets: WalletService,
    pub escrows: Arc<EscrowManager>,
    pub withdrawals: Arc<WithdrawalContractManager>,
    pub gateway: Arc<dyn FxGateway>,
}

impl AppState {
    /// Wire the service graph over a pool and a gateway implementation.
    ///
    /// Tests call this with a temp-file pool and a mock gateway; `main`
    /// calls it with the real pool and the XE HTTP client.
    pub fn build(pool: Arc<DbPool>, gateway: Arc<dyn FxGateway>) -> Self {
        let currency = config::get_ledger_currency();
        let platform_user = config::get_platform_wallet_user();

        let notifier = Notifier::new(Arc::clone(&pool));
        let wallets = WalletService::new(Arc::clone(&pool), currency.clone());
        let escrows = Arc::new(EscrowManager::new(
            Arc::clone(&pool),
            FeeCalculator::new(FeePolicy::release()),
            notifier.clone(),
            currency,
            platform_user,
        ));
        let withdrawals = Arc::new(WithdrawalContractManager::new(
            Arc::clone(&pool),
            Arc::clone(&gateway),
            notifier,
        ));

        Self {
            pool,
            wallets,
            escrows,
            withdrawals,
            gateway,
        }
    }

    /// The expiry watchdog over this state's withdrawal manager.
    pub fn watchdog(&self, config: WatchdogConfig) -> Arc<ExpiryWatchdog> {
        Arc::new(ExpiryWatchdog::new(
            Arc::clone(&self.pool),
            Arc::clone(&self.withdrawals),
            config,
        ))
    }
}
