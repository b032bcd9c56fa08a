//! Idempotency key middleware
//!
//! Money-moving POSTs must carry an `Idempotency-Key` header. The first
//! request processes normally and its response is recorded; a retry with the
//! same key, same user, same endpoint replays the recorded response with an
//! `Idempotent-Replayed: true` header instead of re-running the operation.
//!
//! Records live in the `idempotency_keys` table and are purged by the
//! expiry watchdog after the configured TTL. A storage failure during the
//! lookup fails open: availability of the endpoint wins over replay
//! protection, and the settlement paths have their own storage-level
//! idempotency anchors.

use std::rc::Rc;
use std::sync::Arc;

use actix_web::body::{BoxBody, EitherBody, MessageBody};
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::{Method, StatusCode};
use actix_web::{Error, HttpResponse};
use chrono::{Duration, Utc};
use futures_util::future::{ok, LocalBoxFuture, Ready};
use sha2::{Digest, Sha256};

use crate::db::{with_conn, DbPool};
use crate::middleware::auth::USER_ID_HEADER;
use crate::models::IdempotencyRecord;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const REPLAYED_HEADER: &str = "Idempotent-Replayed";

/// Idempotency middleware factory
pub struct IdempotencyMiddleware {
    pool: Arc<DbPool>,
    ttl_secs: u64,
    /// Path prefixes that require an idempotency key
    required_prefixes: Vec<String>,
}

impl IdempotencyMiddleware {
    pub fn new(pool: Arc<DbPool>, ttl_secs: u64) -> Self {
        Self {
            pool,
            ttl_secs,
            required_prefixes: vec![
                "/api/escrows".to_string(),
                "/api/withdrawals".to_string(),
            ],
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for IdempotencyMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type InitError = ();
    type Transform = IdempotencyMiddlewareService<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(IdempotencyMiddlewareService {
            service: Rc::new(service),
            pool: Arc::clone(&self.pool),
            ttl_secs: self.ttl_secs,
            required_prefixes: self.required_prefixes.clone(),
        })
    }
}

pub struct IdempotencyMiddlewareService<S> {
    service: Rc<S>,
    pool: Arc<DbPool>,
    ttl_secs: u64,
    required_prefixes: Vec<String>,
}

impl<S> IdempotencyMiddlewareService<S> {
    fn requires_idempotency(&self, path: &str, method: &Method) -> bool {
        method == Method::POST && self.required_prefixes.iter().any(|p| path.starts_with(p))
    }
}

/// Hash of (key, user, endpoint); the storage key for the replay record.
fn key_hash(idempotency_key: &str, user_id: Option<&str>, endpoint: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(idempotency_key.as_bytes());
    hasher.update(b"|");
    if let Some(uid) = user_id {
        hasher.update(uid.as_bytes());
    }
    hasher.update(b"|");
    hasher.update(endpoint.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Accept UUIDs or any reasonable opaque token.
pub fn validate_idempotency_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 255
        && key
            .chars()
            .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

impl<S, B> Service<ServiceRequest> for IdempotencyMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let path = req.path().to_string();
        let method = req.method().clone();

        if !self.requires_idempotency(&path, &method) {
            let service = Rc::clone(&self.service);
            return Box::pin(async move {
                let res = service.call(req).await?;
                Ok(res.map_into_left_body())
            });
        }

        let key = req
            .headers()
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let key = match key {
            Some(k) if validate_idempotency_key(&k) => k,
            _ => {
                let response = HttpResponse::BadRequest().json(serde_json::json!({
                    "success": false,
                    "error_code": "IDEMPOTENCY-001",
                    "error": "Idempotency-Key header required",
                    "recoverable": true,
                }));
                return Box::pin(async move {
                    Ok(req.into_response(response).map_into_right_body())
                });
            }
        };

        let user_id: Option<String> = req
            .headers()
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let hash = key_hash(&key, user_id.as_deref(), &path);
        let pool = Arc::clone(&self.pool);
        let ttl_secs = self.ttl_secs;
        let service = Rc::clone(&self.service);

        Box::pin(async move {
            // Replay check; a lookup failure fails open
            let lookup = {
                let hash = hash.clone();
                with_conn(&pool, move |conn| IdempotencyRecord::find(conn, &hash)).await
            };

            match lookup {
                Ok(Some(record)) => {
                    tracing::info!(endpoint = %path, "replaying idempotent response");
                    let status = StatusCode::from_u16(record.status_code as u16)
                        .unwrap_or(StatusCode::OK);
                    let response = HttpResponse::build(status)
                        .insert_header(("Content-Type", record.content_type.as_str()))
                        .insert_header((REPLAYED_HEADER, "true"))
                        .body(record.response_body);
                    return Ok(req.into_response(response).map_into_right_body());
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %e, "idempotency lookup failed, processing anyway");
                    let res = service.call(req).await?;
                    return Ok(res.map_into_left_body());
                }
            }

            // First sighting of this key: run the handler and capture the
            // response body so the retry can be answered verbatim
            let res = service.call(req).await?;
            let (http_req, res) = res.into_parts();
            let status = res.status();
            let content_type = res
                .headers()
                .get(actix_web::http::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("application/json")
                .to_string();

            let body_bytes = actix_web::body::to_bytes(res.into_body())
                .await
                .map_err(|_| actix_web::error::ErrorInternalServerError("body read failed"))?;
            let body_str = String::from_utf8_lossy(&body_bytes).to_string();

            // Only successful outcomes are worth replaying; a failed attempt
            // should be allowed to retry for real
            if status.is_success() {
                let now = Utc::now().naive_utc();
                let record = IdempotencyRecord {
                    key_hash: hash,
                    user_id,
                    endpoint: path,
                    status_code: status.as_u16() as i32,
                    response_body: body_str.clone(),
                    content_type: content_type.clone(),
                    created_at: now,
                    expires_at: now + Duration::seconds(ttl_secs as i64),
                };
                if let Err(e) =
                    with_conn(&pool, move |conn| IdempotencyRecord::store(conn, record)).await
                {
                    tracing::error!(error = %e, "failed to store idempotency record");
                }
            }

            let response = HttpResponse::build(status)
                .insert_header(("Content-Type", content_type.as_str()))
                .body(body_str);
            Ok(ServiceResponse::new(http_req, response).map_into_right_body())
        })
    }
}
