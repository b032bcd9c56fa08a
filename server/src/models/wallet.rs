//! Wallet ledger model
//!
//! Balances are minor units (cents). `held_amount` is the slice of `balance`
//! reserved by pending withdrawal contracts; spendable funds are always
//! `balance - held_amount`. The table carries CHECK constraints for
//! `balance >= 0` and `held_amount <= balance`, so even a bug in the guarded
//! updates below cannot drive a wallet negative.

use anyhow::Context;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::schema::wallets;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = wallets)]
pub struct Wallet {
    /// UUID for wallet identity
    pub id: String,

    /// Owning user; one wallet per user, enforced by a unique index
    pub user_id: String,

    /// Ledger currency code (ISO 4217)
    pub currency: String,

    /// Total funds in minor units, including held funds
    pub balance: i64,

    /// Funds reserved by pending withdrawal contracts
    pub held_amount: i64,

    /// Lifetime credits from milestone releases
    pub total_earned: i64,

    /// Lifetime debits into escrow funding
    pub total_spent: i64,

    /// Lifetime settled withdrawals
    pub total_withdrawn: i64,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Clone, Insertable)]
#[diesel(table_name = wallets)]
pub struct NewWallet {
    pub id: String,
    pub user_id: String,
    pub currency: String,
    pub balance: i64,
}

impl Wallet {
    /// Funds not reserved by a pending withdrawal contract.
    pub fn available(&self) -> i64 {
        self.balance - self.held_amount
    }

    /// Create a new empty wallet for a user.
    pub fn create(conn: &mut SqliteConnection, user_id: &str, currency: &str) -> EngineResult<Wallet> {
        let new_wallet = NewWallet {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            currency: currency.to_string(),
            balance: 0,
        };

        diesel::insert_into(wallets::table)
            .values(&new_wallet)
            .execute(conn)
            .context(format!("Failed to insert wallet for user {}", user_id))?;

        Self::find_by_id(conn, &new_wallet.id)
    }

    /// Find wallet by ID
    pub fn find_by_id(conn: &mut SqliteConnection, wallet_id: &str) -> EngineResult<Wallet> {
        wallets::table
            .filter(wallets::id.eq(wallet_id))
            .first(conn)
            .optional()
            .context(format!("Failed to load wallet {}", wallet_id))?
            .ok_or_else(|| EngineError::NotFound(format!("Wallet {}", wallet_id)))
    }

    /// Find the wallet owned by a user
    pub fn find_by_user_id(conn: &mut SqliteConnection, user_id: &str) -> EngineResult<Wallet> {
        wallets::table
            .filter(wallets::user_id.eq(user_id))
            .first(conn)
            .optional()
            .context(format!("Failed to load wallet for user {}", user_id))?
            .ok_or_else(|| EngineError::NotFound(format!("Wallet for user {}", user_id)))
    }

    /// Find the user's wallet, creating an empty one on first touch.
    pub fn find_or_create(
        conn: &mut SqliteConnection,
        user_id: &str,
        currency: &str,
    ) -> EngineResult<Wallet> {
        match Self::find_by_user_id(conn, user_id) {
            Ok(wallet) => Ok(wallet),
            Err(EngineError::NotFound(_)) => Self::create(conn, user_id, currency),
            Err(e) => Err(e),
        }
    }

    /// Add funds to the wallet.
    ///
    /// `earned` distinguishes milestone income (counted in `total_earned`)
    /// from refunds and reversals, which only restore the balance.
    pub fn credit(
        conn: &mut SqliteConnection,
        wallet_id: &str,
        amount: i64,
        earned: bool,
    ) -> EngineResult<()> {
        if amount <= 0 {
            return Err(EngineError::InvalidAmount(amount));
        }

        let earned_delta = if earned { amount } else { 0 };
        let updated = diesel::update(wallets::table.filter(wallets::id.eq(wallet_id)))
            .set((
                wallets::balance.eq(wallets::balance + amount),
                wallets::total_earned.eq(wallets::total_earned + earned_delta),
                wallets::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)
            .context(format!("Failed to credit wallet {}", wallet_id))?;

        if updated == 0 {
            return Err(EngineError::NotFound(format!("Wallet {}", wallet_id)));
        }
        Ok(())
    }

    /// Remove spendable funds from the wallet.
    ///
    /// Guarded on `balance - held_amount >= amount` so a concurrent hold or
    /// debit can never push the wallet past its reserved funds.
    pub fn debit(conn: &mut SqliteConnection, wallet_id: &str, amount: i64) -> EngineResult<()> {
        if amount <= 0 {
            return Err(EngineError::InvalidAmount(amount));
        }

        let updated = diesel::update(
            wallets::table
                .filter(wallets::id.eq(wallet_id))
                .filter((wallets::balance - wallets::held_amount).ge(amount)),
        )
        .set((
            wallets::balance.eq(wallets::balance - amount),
            wallets::total_spent.eq(wallets::total_spent + amount),
            wallets::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .context(format!("Failed to debit wallet {}", wallet_id))?;

        if updated == 0 {
            let wallet = Self::find_by_id(conn, wallet_id)?;
            return Err(EngineError::InsufficientFunds {
                available: wallet.available(),
                requested: amount,
            });
        }
        Ok(())
    }

    /// Reserve spendable funds for a pending withdrawal contract.
    pub fn hold(conn: &mut SqliteConnection, wallet_id: &str, amount: i64) -> EngineResult<()> {
        if amount <= 0 {
            return Err(EngineError::InvalidAmount(amount));
        }

        let updated = diesel::update(
            wallets::table
                .filter(wallets::id.eq(wallet_id))
                .filter((wallets::balance - wallets::held_amount).ge(amount)),
        )
        .set((
            wallets::held_amount.eq(wallets::held_amount + amount),
            wallets::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .context(format!("Failed to place hold on wallet {}", wallet_id))?;

        if updated == 0 {
            let wallet = Self::find_by_id(conn, wallet_id)?;
            return Err(EngineError::InsufficientFunds {
                available: wallet.available(),
                requested: amount,
            });
        }
        Ok(())
    }

    /// Release a hold without spending it (cancellation, expiry, failure).
    pub fn release_hold(
        conn: &mut SqliteConnection,
        wallet_id: &str,
        amount: i64,
    ) -> EngineResult<()> {
        if amount <= 0 {
            return Err(EngineError::InvalidAmount(amount));
        }

        let updated = diesel::update(
            wallets::table
                .filter(wallets::id.eq(wallet_id))
                .filter(wallets::held_amount.ge(amount)),
        )
        .set((
            wallets::held_amount.eq(wallets::held_amount - amount),
            wallets::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .context(format!("Failed to release hold on wallet {}", wallet_id))?;

        if updated == 0 {
            return Err(EngineError::ConcurrentModification);
        }
        Ok(())
    }

    /// Convert a hold into a settled withdrawal, removing the funds.
    pub fn settle_hold(
        conn: &mut SqliteConnection,
        wallet_id: &str,
        amount: i64,
    ) -> EngineResult<()> {
        if amount <= 0 {
            return Err(EngineError::InvalidAmount(amount));
        }

        let updated = diesel::update(
            wallets::table
                .filter(wallets::id.eq(wallet_id))
                .filter(wallets::held_amount.ge(amount)),
        )
        .set((
            wallets::balance.eq(wallets::balance - amount),
            wallets::held_amount.eq(wallets::held_amount - amount),
            wallets::total_withdrawn.eq(wallets::total_withdrawn + amount),
            wallets::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .context(format!("Failed to settle hold on wallet {}", wallet_id))?;

        if updated == 0 {
            return Err(EngineError::ConcurrentModification);
        }
        Ok(())
    }

    /// Sum of all wallet balances, used by reconciliation.
    pub fn total_balance(conn: &mut SqliteConnection) -> EngineResult<i64> {
        use diesel::dsl::sql;
        use diesel::sql_types::{BigInt, Nullable};

        // SUM over BigInt typed as Nullable<BigInt>; diesel's sum() infers
        // Numeric, which SQLite cannot deserialize into i64
        let total: Option<i64> = wallets::table
            .select(sql::<Nullable<BigInt>>("SUM(balance)"))
            .get_result(conn)
            .context("Failed to sum wallet balances")?;
        Ok(total.unwrap_or(0))
    }
}
