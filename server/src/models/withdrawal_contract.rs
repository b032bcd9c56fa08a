//! Withdrawal contract model
//!
//! A contract is one time-boxed withdrawal attempt. Exactly one
//! `pending_approval` contract may exist per wallet (partial unique index).
//! Every exit from `pending_approval` is a compare-and-set: approve claims
//! the contract, cancel/expire/fail race for the terminal write, and only
//! the winner touches the wallet hold.

use anyhow::Context;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, FxGatewayError};
use crate::schema::withdrawal_contracts;
use crate::services::fx_gateway::FxQuote;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    PendingApproval,
    Approved,
    Cancelled,
    Expired,
    Failed,
    Settled,
}

impl ContractStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractStatus::PendingApproval => "pending_approval",
            ContractStatus::Approved => "approved",
            ContractStatus::Cancelled => "cancelled",
            ContractStatus::Expired => "expired",
            ContractStatus::Failed => "failed",
            ContractStatus::Settled => "settled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_approval" => Some(ContractStatus::PendingApproval),
            "approved" => Some(ContractStatus::Approved),
            "cancelled" => Some(ContractStatus::Cancelled),
            "expired" => Some(ContractStatus::Expired),
            "failed" => Some(ContractStatus::Failed),
            "settled" => Some(ContractStatus::Settled),
            _ => None,
        }
    }

    /// `approved` is a transient claim held during the gateway call;
    /// everything except it and `pending_approval` is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContractStatus::Cancelled
                | ContractStatus::Expired
                | ContractStatus::Failed
                | ContractStatus::Settled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = withdrawal_contracts)]
pub struct WithdrawalContract {
    pub id: String,
    pub wallet_id: String,
    pub payment_method_id: String,
    /// Amount held on the wallet, minor units
    pub requested_amount: i64,
    pub quote_id: String,
    /// Payout amount in the target currency, minor units
    pub quote_amount: i64,
    /// Decimal exchange rate as the provider quoted it, kept verbatim
    pub quote_rate: String,
    /// Withdrawal fee from the quote, minor units of the source currency
    pub quote_fee: i64,
    pub quote_expires_at: NaiveDateTime,
    pub target_currency: String,
    pub status: String,
    pub cancel_reason: Option<String>,
    pub provider_tx_id: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    pub failure_trace_id: Option<String>,
    pub failed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Clone, Insertable)]
#[diesel(table_name = withdrawal_contracts)]
pub struct NewWithdrawalContract {
    pub id: String,
    pub wallet_id: String,
    pub payment_method_id: String,
    pub requested_amount: i64,
    pub quote_id: String,
    pub quote_amount: i64,
    pub quote_rate: String,
    pub quote_fee: i64,
    pub quote_expires_at: NaiveDateTime,
    pub target_currency: String,
    pub status: String,
}

impl WithdrawalContract {
    pub fn status(&self) -> EngineResult<ContractStatus> {
        ContractStatus::parse(&self.status).ok_or_else(|| {
            EngineError::Internal(anyhow::anyhow!(
                "contract {} has unknown status {}",
                self.id,
                self.status
            ))
        })
    }

    pub fn is_quote_expired(&self, now: NaiveDateTime) -> bool {
        now >= self.quote_expires_at
    }

    /// Insert a new `pending_approval` contract.
    ///
    /// The partial unique index on `(wallet_id) WHERE status = 'pending_approval'`
    /// rejects a second concurrent pending contract for the same wallet.
    pub fn create(
        conn: &mut SqliteConnection,
        wallet_id: &str,
        payment_method_id: &str,
        requested_amount: i64,
        quote: &FxQuote,
    ) -> EngineResult<WithdrawalContract> {
        let new_contract = NewWithdrawalContract {
            id: Uuid::new_v4().to_string(),
            wallet_id: wallet_id.to_string(),
            payment_method_id: payment_method_id.to_string(),
            requested_amount,
            quote_id: quote.quote_id.clone(),
            quote_amount: quote.target_amount,
            quote_rate: quote.rate.clone(),
            quote_fee: quote.fee,
            quote_expires_at: quote.expires_at,
            target_currency: quote.target_currency.clone(),
            status: ContractStatus::PendingApproval.as_str().to_string(),
        };

        diesel::insert_into(withdrawal_contracts::table)
            .values(&new_contract)
            .execute(conn)
            .map_err(|e| match e {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    EngineError::ContractNotPending {
                        id: wallet_id.to_string(),
                        status: "pending_approval contract already open".to_string(),
                    }
                }
                other => EngineError::Internal(
                    anyhow::Error::new(other).context("Failed to insert withdrawal contract"),
                ),
            })?;

        Self::find_by_id(conn, &new_contract.id)
    }

    pub fn find_by_id(conn: &mut SqliteConnection, contract_id: &str) -> EngineResult<WithdrawalContract> {
        withdrawal_contracts::table
            .filter(withdrawal_contracts::id.eq(contract_id))
            .first(conn)
            .optional()
            .context(format!("Failed to load contract {}", contract_id))?
            .ok_or_else(|| EngineError::NotFound(format!("Withdrawal contract {}", contract_id)))
    }

    /// Contracts past their quote expiry and still pending, for the sweep.
    pub fn find_expired_pending(
        conn: &mut SqliteConnection,
        now: NaiveDateTime,
        limit: i64,
    ) -> EngineResult<Vec<WithdrawalContract>> {
        withdrawal_contracts::table
            .filter(withdrawal_contracts::status.eq(ContractStatus::PendingApproval.as_str()))
            .filter(withdrawal_contracts::quote_expires_at.le(now))
            .order(withdrawal_contracts::quote_expires_at.asc())
            .limit(limit)
            .load(conn)
            .context("Failed to load expired pending contracts")
            .map_err(EngineError::Internal)
    }

    /// Claim the contract for settlement: CAS `pending_approval -> approved`.
    ///
    /// Returns the number of rows claimed; 0 means another trigger already
    /// moved the contract and the caller must re-read to report the status.
    pub fn cas_claim_for_approval(
        conn: &mut SqliteConnection,
        contract_id: &str,
    ) -> EngineResult<usize> {
        diesel::update(
            withdrawal_contracts::table
                .filter(withdrawal_contracts::id.eq(contract_id))
                .filter(
                    withdrawal_contracts::status.eq(ContractStatus::PendingApproval.as_str()),
                ),
        )
        .set((
            withdrawal_contracts::status.eq(ContractStatus::Approved.as_str()),
            withdrawal_contracts::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .context(format!("Failed to claim contract {}", contract_id))
        .map_err(EngineError::Internal)
    }

    /// CAS `pending_approval -> cancelled|expired` with a reason.
    /// All four cancellation triggers funnel through this single write.
    pub fn cas_cancel(
        conn: &mut SqliteConnection,
        contract_id: &str,
        to: ContractStatus,
        reason: &str,
    ) -> EngineResult<usize> {
        diesel::update(
            withdrawal_contracts::table
                .filter(withdrawal_contracts::id.eq(contract_id))
                .filter(
                    withdrawal_contracts::status.eq(ContractStatus::PendingApproval.as_str()),
                ),
        )
        .set((
            withdrawal_contracts::status.eq(to.as_str()),
            withdrawal_contracts::cancel_reason.eq(reason),
            withdrawal_contracts::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .context(format!("Failed to cancel contract {}", contract_id))
        .map_err(EngineError::Internal)
    }

    /// Finish a claimed contract: `approved -> settled` with the provider's
    /// transaction id.
    pub fn mark_settled(
        conn: &mut SqliteConnection,
        contract_id: &str,
        provider_tx_id: &str,
    ) -> EngineResult<()> {
        let updated = diesel::update(
            withdrawal_contracts::table
                .filter(withdrawal_contracts::id.eq(contract_id))
                .filter(withdrawal_contracts::status.eq(ContractStatus::Approved.as_str())),
        )
        .set((
            withdrawal_contracts::status.eq(ContractStatus::Settled.as_str()),
            withdrawal_contracts::provider_tx_id.eq(provider_tx_id),
            withdrawal_contracts::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .context(format!("Failed to settle contract {}", contract_id))?;

        if updated == 0 {
            return Err(EngineError::ConcurrentModification);
        }
        Ok(())
    }

    /// Record a gateway failure on a claimed contract: `approved -> failed`,
    /// preserving the provider's structured error for diagnosis.
    pub fn mark_failed(
        conn: &mut SqliteConnection,
        contract_id: &str,
        error: &FxGatewayError,
    ) -> EngineResult<()> {
        let now = Utc::now().naive_utc();
        let updated = diesel::update(
            withdrawal_contracts::table
                .filter(withdrawal_contracts::id.eq(contract_id))
                .filter(withdrawal_contracts::status.eq(ContractStatus::Approved.as_str())),
        )
        .set((
            withdrawal_contracts::status.eq(ContractStatus::Failed.as_str()),
            withdrawal_contracts::failure_code.eq(&error.code),
            withdrawal_contracts::failure_message.eq(&error.message),
            withdrawal_contracts::failure_trace_id.eq(&error.trace_id),
            withdrawal_contracts::failed_at.eq(now),
            withdrawal_contracts::updated_at.eq(now),
        ))
        .execute(conn)
        .context(format!("Failed to mark contract {} failed", contract_id))?;

        if updated == 0 {
            return Err(EngineError::ConcurrentModification);
        }
        Ok(())
    }
}
