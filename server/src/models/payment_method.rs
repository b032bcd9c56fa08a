//! Payment method model
//!
//! A payout destination (bank account) registered with the FX provider.
//! `approved` flips to true only after the provider accepts the recipient;
//! verification failures keep the provider's structured error on the row so
//! support can read the exact provider diagnosis later.

use anyhow::Context;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult, FxGatewayError};
use crate::schema::payment_methods;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = payment_methods)]
pub struct PaymentMethod {
    pub id: String,
    pub user_id: String,
    /// Recipient id assigned by the FX provider once verified
    pub recipient_id: Option<String>,
    pub bank_name: String,
    pub account_holder: String,
    /// Only the last four digits are ever stored
    pub iban_last4: String,
    pub target_currency: String,
    pub approved: bool,
    pub xe_error_code: Option<String>,
    pub xe_error_message: Option<String>,
    pub xe_error_trace_id: Option<String>,
    pub xe_error_at: Option<NaiveDateTime>,
    pub verify_attempts: i32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Clone, Insertable)]
#[diesel(table_name = payment_methods)]
pub struct NewPaymentMethod {
    pub id: String,
    pub user_id: String,
    pub bank_name: String,
    pub account_holder: String,
    pub iban_last4: String,
    pub target_currency: String,
    pub approved: bool,
}

impl PaymentMethod {
    pub fn create(
        conn: &mut SqliteConnection,
        user_id: &str,
        bank_name: &str,
        account_holder: &str,
        iban_last4: &str,
        target_currency: &str,
    ) -> EngineResult<PaymentMethod> {
        let new_method = NewPaymentMethod {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            bank_name: bank_name.to_string(),
            account_holder: account_holder.to_string(),
            iban_last4: iban_last4.to_string(),
            target_currency: target_currency.to_string(),
            approved: false,
        };

        diesel::insert_into(payment_methods::table)
            .values(&new_method)
            .execute(conn)
            .context(format!("Failed to insert payment method for user {}", user_id))?;

        Self::find_by_id(conn, &new_method.id)
    }

    pub fn find_by_id(conn: &mut SqliteConnection, method_id: &str) -> EngineResult<PaymentMethod> {
        payment_methods::table
            .filter(payment_methods::id.eq(method_id))
            .first(conn)
            .optional()
            .context(format!("Failed to load payment method {}", method_id))?
            .ok_or_else(|| EngineError::NotFound(format!("Payment method {}", method_id)))
    }

    pub fn find_by_user(
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> EngineResult<Vec<PaymentMethod>> {
        payment_methods::table
            .filter(payment_methods::user_id.eq(user_id))
            .order(payment_methods::created_at.desc())
            .load(conn)
            .context(format!("Failed to load payment methods for user {}", user_id))
            .map_err(EngineError::Internal)
    }

    /// Provider accepted the recipient: approve and clear any stale error.
    pub fn mark_approved(
        conn: &mut SqliteConnection,
        method_id: &str,
        recipient_id: &str,
    ) -> EngineResult<()> {
        let updated = diesel::update(
            payment_methods::table.filter(payment_methods::id.eq(method_id)),
        )
        .set((
            payment_methods::approved.eq(true),
            payment_methods::recipient_id.eq(recipient_id),
            payment_methods::xe_error_code.eq(None::<String>),
            payment_methods::xe_error_message.eq(None::<String>),
            payment_methods::xe_error_trace_id.eq(None::<String>),
            payment_methods::xe_error_at.eq(None::<NaiveDateTime>),
            payment_methods::verify_attempts.eq(payment_methods::verify_attempts + 1),
            payment_methods::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .context(format!("Failed to approve payment method {}", method_id))?;

        if updated == 0 {
            return Err(EngineError::NotFound(format!("Payment method {}", method_id)));
        }
        Ok(())
    }

    /// Provider rejected the recipient: keep the structured error on the row.
    pub fn record_verify_failure(
        conn: &mut SqliteConnection,
        method_id: &str,
        error: &FxGatewayError,
    ) -> EngineResult<()> {
        let now = Utc::now().naive_utc();
        let updated = diesel::update(
            payment_methods::table.filter(payment_methods::id.eq(method_id)),
        )
        .set((
            payment_methods::approved.eq(false),
            payment_methods::xe_error_code.eq(&error.code),
            payment_methods::xe_error_message.eq(&error.message),
            payment_methods::xe_error_trace_id.eq(&error.trace_id),
            payment_methods::xe_error_at.eq(now),
            payment_methods::verify_attempts.eq(payment_methods::verify_attempts + 1),
            payment_methods::updated_at.eq(now),
        ))
        .execute(conn)
        .context(format!(
            "Failed to record verification failure on payment method {}",
            method_id
        ))?;

        if updated == 0 {
            return Err(EngineError::NotFound(format!("Payment method {}", method_id)));
        }
        Ok(())
    }
}
