use actix_web::{get, web, HttpResponse};

use crate::error::ApiError;
use crate::AppState;

/// Liveness/readiness probe. Verifies a pooled connection can be acquired.
#[get("/health")]
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let pool = state.pool.clone();
    let db_ok = tokio::task::spawn_blocking(move || pool.get().is_ok())
        .await
        .unwrap_or(false);

    if db_ok {
        Ok(HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
        })))
    } else {
        Ok(HttpResponse::ServiceUnavailable().json(serde_json::json!({
            "status": "degraded",
            "details": "database pool exhausted",
        })))
    }
}
