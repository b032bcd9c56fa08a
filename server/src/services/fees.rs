//! Fee calculator
//!
//! Pure functions of (amount, policy). No clock, no database, no globals:
//! release, completion, and dispute-refund paths all call through here, and
//! the results must reconcile when the transaction log is replayed.

use crate::config::FeePolicy;
use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy)]
pub struct FeeCalculator {
    policy: FeePolicy,
}

impl FeeCalculator {
    pub fn new(policy: FeePolicy) -> Self {
        Self { policy }
    }

    /// Platform fee on a gross amount, in minor units.
    ///
    /// Basis-point product rounds down, then the configured minimum is
    /// applied. The fee never exceeds the amount itself.
    pub fn platform_fee(&self, amount: i64) -> EngineResult<i64> {
        if amount <= 0 {
            return Err(EngineError::InvalidAmount(amount));
        }

        let fee = (amount as i128 * self.policy.fee_bps as i128 / 10_000) as i64;
        let fee = fee.max(self.policy.min_fee_minor);
        Ok(fee.min(amount))
    }

    /// What the recipient actually receives after the platform fee.
    pub fn net_payout(&self, amount: i64) -> EngineResult<i64> {
        Ok(amount - self.platform_fee(amount)?)
    }

    /// Unconsumed remainder of an allocation, returned on closure.
    pub fn excess_refund(&self, allocated: i64, consumed: i64) -> EngineResult<i64> {
        if allocated < 0 || consumed < 0 || consumed > allocated {
            return Err(EngineError::InvalidAmount(allocated - consumed));
        }
        Ok(allocated - consumed)
    }
}
