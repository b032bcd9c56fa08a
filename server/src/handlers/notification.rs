use actix_web::{get, web, HttpResponse};
use serde::Deserialize;

use crate::db::with_conn;
use crate::error::ApiError;
use crate::middleware::Identity;
use crate::models::Notification;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct NotificationQuery {
    pub limit: Option<i64>,
}

/// The caller's notifications, newest first.
#[get("/notifications")]
pub async fn list_notifications(
    identity: Identity,
    state: web::Data<AppState>,
    query: web::Query<NotificationQuery>,
) -> Result<HttpResponse, ApiError> {
    let user_id = identity.user_id.clone();
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let notifications = with_conn(&state.pool, move |conn| {
        Notification::find_by_user(conn, &user_id, limit)
    })
    .await?;
    Ok(HttpResponse::Ok().json(notifications))
}
