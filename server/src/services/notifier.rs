//! Notification service
//!
//! Fire-and-forget: settlement paths call [`Notifier::notify`] after their
//! transaction commits, and a failed notification write is logged, never
//! propagated. Money movement must not depend on messaging.

use std::sync::Arc;

use crate::db::{with_conn, DbPool};
use crate::models::{NewNotification, Notification};

#[derive(Clone)]
pub struct Notifier {
    pool: Arc<DbPool>,
}

impl Notifier {
    pub fn new(pool: Arc<DbPool>) -> Self {
        Self { pool }
    }

    /// Record a notification for the user. Errors are swallowed after
    /// logging; callers never await delivery.
    pub fn notify(&self, user_id: &str, kind: &str, title: &str, body: &str) {
        let pool = Arc::clone(&self.pool);
        let notification = NewNotification::new(user_id, kind, title, body);
        let user = user_id.to_string();
        let kind_owned = kind.to_string();

        tokio::spawn(async move {
            if let Err(e) = with_conn(&pool, move |conn| {
                Notification::create(conn, notification)
            })
            .await
            {
                tracing::warn!(
                    user_id = %user,
                    kind = %kind_owned,
                    error = %e,
                    "failed to record notification"
                );
            }
        });
    }
}
