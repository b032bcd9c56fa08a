//! Milestone model
//!
//! Milestones are created with their escrow and ordered by `position`.
//! Release is recorded here for display; the idempotency guarantee lives on
//! the transactions table (unique milestone-release index), not this row.

use anyhow::Context;
use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::schema::milestones;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneState {
    Pending,
    Approved,
    Released,
}

impl MilestoneState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MilestoneState::Pending => "pending",
            MilestoneState::Approved => "approved",
            MilestoneState::Released => "released",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MilestoneState::Pending),
            "approved" => Some(MilestoneState::Approved),
            "released" => Some(MilestoneState::Released),
            _ => None,
        }
    }

    pub fn is_releasable(&self) -> bool {
        matches!(self, MilestoneState::Pending | MilestoneState::Approved)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = milestones)]
pub struct Milestone {
    pub id: String,
    pub escrow_id: String,
    /// 1-based order within the escrow
    pub position: i32,
    /// Gross amount in minor units
    pub amount: i64,
    pub state: String,
    pub released_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Insertable)]
#[diesel(table_name = milestones)]
pub struct NewMilestone {
    pub id: String,
    pub escrow_id: String,
    pub position: i32,
    pub amount: i64,
    pub state: String,
}

impl Milestone {
    pub fn create_batch(
        conn: &mut SqliteConnection,
        escrow_id: &str,
        amounts: &[i64],
    ) -> EngineResult<Vec<Milestone>> {
        let rows: Vec<NewMilestone> = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| NewMilestone {
                id: Uuid::new_v4().to_string(),
                escrow_id: escrow_id.to_string(),
                position: (i + 1) as i32,
                amount: *amount,
                state: MilestoneState::Pending.as_str().to_string(),
            })
            .collect();

        diesel::insert_into(milestones::table)
            .values(&rows)
            .execute(conn)
            .context(format!("Failed to insert milestones for escrow {}", escrow_id))?;

        Self::find_by_escrow(conn, escrow_id)
    }

    pub fn find_by_id(conn: &mut SqliteConnection, milestone_id: &str) -> EngineResult<Milestone> {
        milestones::table
            .filter(milestones::id.eq(milestone_id))
            .first(conn)
            .optional()
            .context(format!("Failed to load milestone {}", milestone_id))?
            .ok_or_else(|| EngineError::NotFound(format!("Milestone {}", milestone_id)))
    }

    /// Milestones for an escrow, ordered by position.
    pub fn find_by_escrow(
        conn: &mut SqliteConnection,
        escrow_id: &str,
    ) -> EngineResult<Vec<Milestone>> {
        milestones::table
            .filter(milestones::escrow_id.eq(escrow_id))
            .order(milestones::position.asc())
            .load(conn)
            .context(format!("Failed to load milestones for escrow {}", escrow_id))
            .map_err(EngineError::Internal)
    }

    pub fn state(&self) -> EngineResult<MilestoneState> {
        MilestoneState::parse(&self.state).ok_or_else(|| {
            EngineError::Internal(anyhow::anyhow!(
                "milestone {} has unknown state {}",
                self.id,
                self.state
            ))
        })
    }

    /// Mark approved; a releasable state either way, kept for audit.
    pub fn approve(conn: &mut SqliteConnection, milestone_id: &str) -> EngineResult<()> {
        let updated = diesel::update(
            milestones::table
                .filter(milestones::id.eq(milestone_id))
                .filter(milestones::state.eq(MilestoneState::Pending.as_str())),
        )
        .set(milestones::state.eq(MilestoneState::Approved.as_str()))
        .execute(conn)
        .context(format!("Failed to approve milestone {}", milestone_id))?;

        if updated == 0 {
            return Err(EngineError::ConcurrentModification);
        }
        Ok(())
    }

    /// CAS pending/approved -> released.
    pub fn mark_released(conn: &mut SqliteConnection, milestone_id: &str) -> EngineResult<()> {
        let releasable = [
            MilestoneState::Pending.as_str(),
            MilestoneState::Approved.as_str(),
        ];
        let updated = diesel::update(
            milestones::table
                .filter(milestones::id.eq(milestone_id))
                .filter(milestones::state.eq_any(releasable)),
        )
        .set((
            milestones::state.eq(MilestoneState::Released.as_str()),
            milestones::released_at.eq(Utc::now().naive_utc()),
        ))
        .execute(conn)
        .context(format!("Failed to mark milestone {} released", milestone_id))?;

        if updated == 0 {
            return Err(EngineError::AlreadyReleased {
                milestone_id: milestone_id.to_string(),
            });
        }
        Ok(())
    }

    /// True when every milestone of the escrow has been released.
    pub fn all_released(conn: &mut SqliteConnection, escrow_id: &str) -> EngineResult<bool> {
        let unreleased: i64 = milestones::table
            .filter(milestones::escrow_id.eq(escrow_id))
            .filter(milestones::state.ne(MilestoneState::Released.as_str()))
            .count()
            .get_result(conn)
            .context(format!("Failed to count milestones for escrow {}", escrow_id))?;
        Ok(unreleased == 0)
    }
}
