//! Wallet service
//!
//! Pairs every balance mutation with its transaction log entry inside one
//! SQLite transaction: no balance change without a log row, no log row
//! describing a change that did not happen.

use std::sync::Arc;

use crate::db::{with_conn, with_transaction, DbPool};
use crate::error::EngineResult;
use crate::models::{NewTransaction, Transaction, TxType, Wallet};

#[derive(Clone)]
pub struct WalletService {
    pool: Arc<DbPool>,
    currency: String,
}

impl WalletService {
    pub fn new(pool: Arc<DbPool>, currency: String) -> Self {
        Self { pool, currency }
    }

    /// The user's wallet, created empty on first touch.
    pub async fn wallet_for_user(&self, user_id: &str) -> EngineResult<Wallet> {
        let user_id = user_id.to_string();
        let currency = self.currency.clone();
        with_conn(&self.pool, move |conn| {
            Wallet::find_or_create(conn, &user_id, &currency)
        })
        .await
    }

    pub async fn wallet_by_id(&self, wallet_id: &str) -> EngineResult<Wallet> {
        let wallet_id = wallet_id.to_string();
        with_conn(&self.pool, move |conn| Wallet::find_by_id(conn, &wallet_id)).await
    }

    /// Credit a wallet and log it, atomically.
    pub async fn credit(
        &self,
        wallet_id: &str,
        amount: i64,
        tx_meta: NewTransaction,
    ) -> EngineResult<Transaction> {
        let wallet_id = wallet_id.to_string();
        let earned = tx_meta.tx_type == TxType::Milestone.as_str();
        with_transaction(&self.pool, move |conn| {
            Wallet::credit(conn, &wallet_id, amount, earned)?;
            Transaction::create(conn, tx_meta)
        })
        .await
    }

    /// Recent transaction history for a wallet, newest first.
    pub async fn history(&self, wallet_id: &str, limit: i64) -> EngineResult<Vec<Transaction>> {
        let wallet_id = wallet_id.to_string();
        with_conn(&self.pool, move |conn| {
            Transaction::find_by_wallet(conn, &wallet_id, limit)
        })
        .await
    }
}
