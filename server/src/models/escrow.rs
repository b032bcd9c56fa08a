//! Escrow model
//!
//! One escrow per hired project engagement. `released_amount` only ever grows
//! toward `total_amount`; the remainder is whatever has not been released or
//! refunded yet. Escrows are never deleted, they only reach a terminal status.

use anyhow::Context;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::schema::escrows;

/// Escrow lifecycle states.
///
/// `active → partially_released → completed`, with
/// `active|partially_released → disputed → {partially_released|refunded}`
/// as the only branch. `completed` and `refunded` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Active,
    PartiallyReleased,
    Completed,
    Disputed,
    Refunded,
}

impl EscrowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Active => "active",
            EscrowStatus::PartiallyReleased => "partially_released",
            EscrowStatus::Completed => "completed",
            EscrowStatus::Disputed => "disputed",
            EscrowStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(EscrowStatus::Active),
            "partially_released" => Some(EscrowStatus::PartiallyReleased),
            "completed" => Some(EscrowStatus::Completed),
            "disputed" => Some(EscrowStatus::Disputed),
            "refunded" => Some(EscrowStatus::Refunded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EscrowStatus::Completed | EscrowStatus::Refunded)
    }

    /// Releases are allowed while the escrow is live and not frozen.
    pub fn allows_release(&self) -> bool {
        matches!(self, EscrowStatus::Active | EscrowStatus::PartiallyReleased)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = escrows)]
pub struct Escrow {
    pub id: String,

    /// Project this escrow funds; unique, one escrow per engagement
    pub project_id: String,

    pub client_id: String,
    pub freelancer_id: String,

    /// Locked budget in minor units
    pub total_amount: i64,

    /// Gross amount released through milestones so far
    pub released_amount: i64,

    /// Fees accrued to the platform from this escrow
    pub platform_revenue: i64,

    pub status: String,

    pub dispute_reason: Option<String>,
    pub dispute_created_at: Option<NaiveDateTime>,
    pub dispute_resolved_at: Option<NaiveDateTime>,
    /// "release" or "refund", set when a dispute is resolved
    pub resolution_decision: Option<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Clone, Insertable)]
#[diesel(table_name = escrows)]
pub struct NewEscrow {
    pub id: String,
    pub project_id: String,
    pub client_id: String,
    pub freelancer_id: String,
    pub total_amount: i64,
    pub status: String,
}

impl Escrow {
    /// Funds not yet released from this escrow.
    pub fn remaining_amount(&self) -> i64 {
        self.total_amount - self.released_amount
    }

    pub fn status(&self) -> EngineResult<EscrowStatus> {
        EscrowStatus::parse(&self.status).ok_or_else(|| {
            EngineError::Internal(anyhow::anyhow!(
                "escrow {} has unknown status {}",
                self.id,
                self.status
            ))
        })
    }

    pub fn create(
        conn: &mut SqliteConnection,
        project_id: &str,
        client_id: &str,
        freelancer_id: &str,
        total_amount: i64,
    ) -> EngineResult<Escrow> {
        let new_escrow = NewEscrow {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            client_id: client_id.to_string(),
            freelancer_id: freelancer_id.to_string(),
            total_amount,
            status: EscrowStatus::Active.as_str().to_string(),
        };

        diesel::insert_into(escrows::table)
            .values(&new_escrow)
            .execute(conn)
            .context(format!("Failed to insert escrow for project {}", project_id))?;

        Self::find_by_id(conn, &new_escrow.id)
    }

    pub fn find_by_id(conn: &mut SqliteConnection, escrow_id: &str) -> EngineResult<Escrow> {
        escrows::table
            .filter(escrows::id.eq(escrow_id))
            .first(conn)
            .optional()
            .context(format!("Failed to load escrow {}", escrow_id))?
            .ok_or_else(|| EngineError::NotFound(format!("Escrow {}", escrow_id)))
    }

    pub fn find_by_project(conn: &mut SqliteConnection, project_id: &str) -> EngineResult<Escrow> {
        escrows::table
            .filter(escrows::project_id.eq(project_id))
            .first(conn)
            .optional()
            .context(format!("Failed to load escrow for project {}", project_id))?
            .ok_or_else(|| EngineError::NotFound(format!("Escrow for project {}", project_id)))
    }

    /// Compare-and-set status transition.
    ///
    /// The WHERE clause pins the expected current status; zero rows means a
    /// concurrent writer moved the escrow first and the caller must re-read.
    pub fn cas_status(
        conn: &mut SqliteConnection,
        escrow_id: &str,
        from: &[EscrowStatus],
        to: EscrowStatus,
    ) -> EngineResult<usize> {
        let from_strs: Vec<&str> = from.iter().map(|s| s.as_str()).collect();
        let updated = diesel::update(
            escrows::table
                .filter(escrows::id.eq(escrow_id))
                .filter(escrows::status.eq_any(from_strs)),
        )
        .set((
            escrows::status.eq(to.as_str()),
            escrows::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .context(format!("Failed to update status for escrow {}", escrow_id))?;
        Ok(updated)
    }

    /// Record a release: bump `released_amount` and `platform_revenue` and
    /// advance the status, all under a guard that the escrow still allows
    /// releases and the remainder covers the amount.
    pub fn apply_release(
        conn: &mut SqliteConnection,
        escrow_id: &str,
        gross_amount: i64,
        fee: i64,
        new_status: EscrowStatus,
    ) -> EngineResult<()> {
        let live = [
            EscrowStatus::Active.as_str(),
            EscrowStatus::PartiallyReleased.as_str(),
        ];
        let updated = diesel::update(
            escrows::table
                .filter(escrows::id.eq(escrow_id))
                .filter(escrows::status.eq_any(live))
                .filter((escrows::total_amount - escrows::released_amount).ge(gross_amount)),
        )
        .set((
            escrows::released_amount.eq(escrows::released_amount + gross_amount),
            escrows::platform_revenue.eq(escrows::platform_revenue + fee),
            escrows::status.eq(new_status.as_str()),
            escrows::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .context(format!("Failed to apply release on escrow {}", escrow_id))?;

        if updated == 0 {
            return Err(EngineError::ConcurrentModification);
        }
        Ok(())
    }

    /// Open a dispute, freezing further releases. CAS from a live status.
    pub fn mark_disputed(
        conn: &mut SqliteConnection,
        escrow_id: &str,
        reason: &str,
    ) -> EngineResult<()> {
        let live = [
            EscrowStatus::Active.as_str(),
            EscrowStatus::PartiallyReleased.as_str(),
        ];
        let now = Utc::now().naive_utc();
        let updated = diesel::update(
            escrows::table
                .filter(escrows::id.eq(escrow_id))
                .filter(escrows::status.eq_any(live)),
        )
        .set((
            escrows::status.eq(EscrowStatus::Disputed.as_str()),
            escrows::dispute_reason.eq(reason),
            escrows::dispute_created_at.eq(now),
            escrows::updated_at.eq(now),
        ))
        .execute(conn)
        .context(format!("Failed to mark escrow {} disputed", escrow_id))?;

        if updated == 0 {
            let escrow = Self::find_by_id(conn, escrow_id)?;
            return Err(EngineError::InvalidEscrowState {
                id: escrow_id.to_string(),
                status: escrow.status,
                required: "active or partially_released".to_string(),
            });
        }
        Ok(())
    }

    /// Close a dispute. CAS from `disputed` only.
    pub fn resolve_dispute(
        conn: &mut SqliteConnection,
        escrow_id: &str,
        decision: &str,
        to: EscrowStatus,
    ) -> EngineResult<()> {
        let now = Utc::now().naive_utc();
        let updated = diesel::update(
            escrows::table
                .filter(escrows::id.eq(escrow_id))
                .filter(escrows::status.eq(EscrowStatus::Disputed.as_str())),
        )
        .set((
            escrows::status.eq(to.as_str()),
            escrows::resolution_decision.eq(decision),
            escrows::dispute_resolved_at.eq(now),
            escrows::updated_at.eq(now),
        ))
        .execute(conn)
        .context(format!("Failed to resolve dispute on escrow {}", escrow_id))?;

        if updated == 0 {
            let escrow = Self::find_by_id(conn, escrow_id)?;
            return Err(EngineError::InvalidEscrowState {
                id: escrow_id.to_string(),
                status: escrow.status,
                required: "disputed".to_string(),
            });
        }
        Ok(())
    }

    /// Sum of unreleased escrow funds, used by reconciliation.
    pub fn total_remaining(conn: &mut SqliteConnection) -> EngineResult<i64> {
        use diesel::dsl::sql;
        use diesel::sql_types::{BigInt, Nullable};

        // SUM over BigInt typed as Nullable<BigInt>; diesel's sum() infers
        // Numeric, which SQLite cannot deserialize into i64
        let total: Option<i64> = escrows::table
            .filter(escrows::status.ne(EscrowStatus::Refunded.as_str()))
            .filter(escrows::status.ne(EscrowStatus::Completed.as_str()))
            .select(sql::<Nullable<BigInt>>("SUM(total_amount - released_amount)"))
            .get_result(conn)
            .context("Failed to sum escrow remainders")?;
        Ok(total.unwrap_or(0))
    }
}
