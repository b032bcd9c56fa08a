//! Idempotency key storage
//!
//! Backing store for the idempotency middleware. Keys are hashed before
//! storage; replays within the TTL return the recorded response verbatim.

use anyhow::Context;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;

use crate::error::{EngineError, EngineResult};
use crate::schema::idempotency_keys;

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = idempotency_keys)]
pub struct IdempotencyRecord {
    /// SHA-256 of (user, endpoint, key)
    pub key_hash: String,
    pub user_id: Option<String>,
    pub endpoint: String,
    pub status_code: i32,
    pub response_body: String,
    pub content_type: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

impl IdempotencyRecord {
    pub fn find(
        conn: &mut SqliteConnection,
        key_hash: &str,
    ) -> EngineResult<Option<IdempotencyRecord>> {
        let record: Option<IdempotencyRecord> = idempotency_keys::table
            .filter(idempotency_keys::key_hash.eq(key_hash))
            .first(conn)
            .optional()
            .context("Failed to look up idempotency key")?;

        // An expired record is treated as absent; the sweep removes it later
        Ok(record.filter(|r| r.expires_at > Utc::now().naive_utc()))
    }

    /// Store a response for replay. A concurrent duplicate insert is fine:
    /// both writers recorded the same logical response.
    pub fn store(conn: &mut SqliteConnection, record: IdempotencyRecord) -> EngineResult<()> {
        diesel::insert_or_ignore_into(idempotency_keys::table)
            .values(&record)
            .execute(conn)
            .context("Failed to store idempotency key")?;
        Ok(())
    }

    /// Delete expired keys; returns the number removed.
    pub fn purge_expired(conn: &mut SqliteConnection) -> EngineResult<usize> {
        diesel::delete(
            idempotency_keys::table
                .filter(idempotency_keys::expires_at.le(Utc::now().naive_utc())),
        )
        .execute(conn)
        .context("Failed to purge expired idempotency keys")
        .map_err(EngineError::Internal)
    }
}
