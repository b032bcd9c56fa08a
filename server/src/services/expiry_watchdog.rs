//! Expiry watchdog for withdrawal contracts
//!
//! Server-side backstop for quote expiry. Client-side triggers (countdown,
//! tab-visibility loss) are best-effort and may never arrive; this sweep is
//! the authoritative one and must run regardless. It also purges stale
//! idempotency keys on the same cadence.

use std::sync::Arc;

use tokio::time::interval;
use tracing::{error, info};

use crate::config::WatchdogConfig;
use crate::db::{with_conn, DbPool};
use crate::error::EngineResult;
use crate::models::IdempotencyRecord;
use crate::services::withdrawal::WithdrawalContractManager;

const SWEEP_BATCH_SIZE: i64 = 100;

pub struct ExpiryWatchdog {
    pool: Arc<DbPool>,
    withdrawals: Arc<WithdrawalContractManager>,
    config: WatchdogConfig,
}

impl ExpiryWatchdog {
    pub fn new(
        pool: Arc<DbPool>,
        withdrawals: Arc<WithdrawalContractManager>,
        config: WatchdogConfig,
    ) -> Self {
        info!(
            poll_interval_secs = config.poll_interval_secs,
            "expiry watchdog initialized"
        );
        Self {
            pool,
            withdrawals,
            config,
        }
    }

    /// Run the sweep loop until the server shuts down.
    pub async fn start(self: Arc<Self>) {
        let mut poll_timer = interval(self.config.poll_interval());

        info!("starting expiry watchdog loop");
        loop {
            poll_timer.tick().await;

            match self.sweep_once().await {
                Ok(0) => {}
                Ok(expired) => info!(expired = expired, "expired overdue withdrawal contracts"),
                Err(e) => error!(error = %e, "expiry sweep failed"),
            }

            if let Err(e) = self.purge_idempotency_keys().await {
                error!(error = %e, "idempotency key purge failed");
            }
        }
    }

    /// One pass: expire every pending contract past its quote deadline.
    /// Exposed separately so tests can drive the sweep deterministically.
    pub async fn sweep_once(&self) -> EngineResult<usize> {
        self.withdrawals.expire_overdue(SWEEP_BATCH_SIZE).await
    }

    async fn purge_idempotency_keys(&self) -> EngineResult<usize> {
        with_conn(&self.pool, IdempotencyRecord::purge_expired).await
    }
}
