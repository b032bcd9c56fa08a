//! Append-only transaction log
//!
//! The log is the source of truth for reconciling wallet balances. Rows are
//! never mutated after reaching `completed`/`failed`. A partial unique index
//! on `(milestone_id, tx_type)` makes the milestone-release entry the
//! idempotency anchor for at-least-once callers.

use anyhow::Context;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::schema::transactions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Deposit,
    Milestone,
    PlatformFee,
    Withdrawal,
    EscrowCompletion,
    Refund,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::Deposit => "deposit",
            TxType::Milestone => "milestone",
            TxType::PlatformFee => "platform_fee",
            TxType::Withdrawal => "withdrawal",
            TxType::EscrowCompletion => "escrow_completion",
            TxType::Refund => "refund",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = transactions)]
pub struct Transaction {
    pub id: String,
    pub wallet_id: String,
    pub escrow_id: Option<String>,
    pub milestone_id: Option<String>,
    pub contract_id: Option<String>,
    pub tx_type: String,
    /// Gross amount in minor units
    pub amount: i64,
    /// Platform fee withheld from `amount`
    pub fee: i64,
    /// Amount actually applied to the wallet (`amount - fee`)
    pub net_amount: i64,
    pub status: String,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Insertable)]
#[diesel(table_name = transactions)]
pub struct NewTransaction {
    pub id: String,
    pub wallet_id: String,
    pub escrow_id: Option<String>,
    pub milestone_id: Option<String>,
    pub contract_id: Option<String>,
    pub tx_type: String,
    pub amount: i64,
    pub fee: i64,
    pub net_amount: i64,
    pub status: String,
}

impl NewTransaction {
    /// Completed log entry with no fee.
    pub fn completed(wallet_id: &str, tx_type: TxType, amount: i64) -> Self {
        Self::with_fee(wallet_id, tx_type, amount, 0)
    }

    /// Completed log entry with a fee withheld from the gross amount.
    pub fn with_fee(wallet_id: &str, tx_type: TxType, amount: i64, fee: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            wallet_id: wallet_id.to_string(),
            escrow_id: None,
            milestone_id: None,
            contract_id: None,
            tx_type: tx_type.as_str().to_string(),
            amount,
            fee,
            net_amount: amount - fee,
            status: "completed".to_string(),
        }
    }

    pub fn for_escrow(mut self, escrow_id: &str) -> Self {
        self.escrow_id = Some(escrow_id.to_string());
        self
    }

    pub fn for_milestone(mut self, milestone_id: &str) -> Self {
        self.milestone_id = Some(milestone_id.to_string());
        self
    }

    pub fn for_contract(mut self, contract_id: &str) -> Self {
        self.contract_id = Some(contract_id.to_string());
        self
    }
}

impl Transaction {
    pub fn create(conn: &mut SqliteConnection, new_tx: NewTransaction) -> EngineResult<Transaction> {
        diesel::insert_into(transactions::table)
            .values(&new_tx)
            .execute(conn)
            .map_err(|e| match e {
                DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                    EngineError::AlreadyReleased {
                        milestone_id: new_tx.milestone_id.clone().unwrap_or_default(),
                    }
                }
                other => EngineError::Internal(
                    anyhow::Error::new(other).context("Failed to insert transaction"),
                ),
            })?;

        Self::find_by_id(conn, &new_tx.id)
    }

    pub fn find_by_id(conn: &mut SqliteConnection, tx_id: &str) -> EngineResult<Transaction> {
        transactions::table
            .filter(transactions::id.eq(tx_id))
            .first(conn)
            .optional()
            .context(format!("Failed to load transaction {}", tx_id))?
            .ok_or_else(|| EngineError::NotFound(format!("Transaction {}", tx_id)))
    }

    /// The milestone-release entry, if that milestone was already released.
    /// Retried release calls return this instead of crediting twice.
    pub fn find_milestone_release(
        conn: &mut SqliteConnection,
        milestone_id: &str,
    ) -> EngineResult<Option<Transaction>> {
        transactions::table
            .filter(transactions::milestone_id.eq(milestone_id))
            .filter(transactions::tx_type.eq(TxType::Milestone.as_str()))
            .first(conn)
            .optional()
            .context(format!(
                "Failed to look up release transaction for milestone {}",
                milestone_id
            ))
            .map_err(EngineError::Internal)
    }

    /// Transaction history for a wallet, newest first.
    pub fn find_by_wallet(
        conn: &mut SqliteConnection,
        wallet_id: &str,
        limit: i64,
    ) -> EngineResult<Vec<Transaction>> {
        transactions::table
            .filter(transactions::wallet_id.eq(wallet_id))
            .order(transactions::created_at.desc())
            .limit(limit)
            .load(conn)
            .context(format!("Failed to load transactions for wallet {}", wallet_id))
            .map_err(EngineError::Internal)
    }
}
