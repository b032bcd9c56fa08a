//! Notification model
//!
//! Fire-and-forget user notifications written by the notifier service.
//! A failed notification write never fails the settlement that produced it.

use anyhow::Context;
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::schema::notifications;

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Identifiable)]
#[diesel(table_name = notifications)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    /// e.g. "milestone_released", "withdrawal_settled", "withdrawal_expired"
    pub kind: String,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub payload_json: Option<String>,
    pub read: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Clone, Insertable)]
#[diesel(table_name = notifications)]
pub struct NewNotification {
    pub id: String,
    pub user_id: String,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    pub payload_json: Option<String>,
}

impl NewNotification {
    pub fn new(user_id: &str, kind: &str, title: &str, body: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            kind: kind.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            link: None,
            payload_json: None,
        }
    }
}

impl Notification {
    pub fn create(conn: &mut SqliteConnection, new_notification: NewNotification) -> EngineResult<()> {
        diesel::insert_into(notifications::table)
            .values(&new_notification)
            .execute(conn)
            .context("Failed to insert notification")?;
        Ok(())
    }

    pub fn find_by_user(
        conn: &mut SqliteConnection,
        user_id: &str,
        limit: i64,
    ) -> EngineResult<Vec<Notification>> {
        notifications::table
            .filter(notifications::user_id.eq(user_id))
            .order(notifications::created_at.desc())
            .limit(limit)
            .load(conn)
            .context(format!("Failed to load notifications for user {}", user_id))
            .map_err(EngineError::Internal)
    }
}
