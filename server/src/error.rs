//! Error taxonomy for the settlement engine
//!
//! `EngineError` is what services return; `ApiError` is its HTTP rendering.
//! Each API error carries a stable error code so the frontend can map it to
//! a precise user message and recovery flow.
//!
//! # Error Code Categories
//! - WAL-xxx: Wallet/balance errors
//! - ESC-xxx: Escrow state errors
//! - WDR-xxx: Withdrawal contract errors
//! - FX-xxx: External FX gateway errors
//! - AUTH-xxx: Authorization errors

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured error detail returned by the FX payout provider.
///
/// Persisted on the payment method / withdrawal contract so a failed
/// verification or payout can be diagnosed and retried later.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
#[error("FX gateway error {code}: {message} (trace {trace_id})")]
pub struct FxGatewayError {
    pub code: String,
    pub message: String,
    pub trace_id: String,
    pub occurred_at: NaiveDateTime,
}

impl FxGatewayError {
    pub fn new(code: &str, message: &str, trace_id: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            trace_id: trace_id.to_string(),
            occurred_at: chrono::Utc::now().naive_utc(),
        }
    }

    /// Timeouts and transport failures get a synthetic code so they flow
    /// through the same failure path as explicit provider errors.
    pub fn timeout(message: &str) -> Self {
        Self::new("GATEWAY_TIMEOUT", message, "-")
    }

    pub fn transport(message: &str) -> Self {
        Self::new("GATEWAY_UNREACHABLE", message, "-")
    }
}

/// Errors produced by the core ledger services.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Insufficient funds: requested {requested}, available {available}")]
    InsufficientFunds { available: i64, requested: i64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Idempotency conflict, not a failure: the milestone credit already
    /// landed and the caller should receive the original transaction.
    #[error("Milestone {milestone_id} already released")]
    AlreadyReleased { milestone_id: String },

    #[error("Payment method {0} is not approved for payouts")]
    PaymentMethodNotApproved(String),

    #[error("Withdrawal contract {0} has expired")]
    ExpiredContract(String),

    #[error("Withdrawal contract {id} is {status}, not pending_approval")]
    ContractNotPending { id: String, status: String },

    #[error("Escrow {id} is {status}; operation requires {required}")]
    InvalidEscrowState {
        id: String,
        status: String,
        required: String,
    },

    #[error(transparent)]
    FxGateway(#[from] FxGatewayError),

    #[error("Concurrent modification, retry the operation")]
    ConcurrentModification,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Transient errors may safely be retried by the caller.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::ConcurrentModification)
    }
}

/// Error response body rendered to API clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Operation success (always false for errors)
    pub success: bool,
    /// Stable error code (e.g., "WAL-001")
    pub error_code: String,
    /// Human-readable error message
    pub error: String,
    /// Whether the client can retry the operation
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(code: &str, message: &str, recoverable: bool) -> Self {
        Self {
            success: false,
            error_code: code.to_string(),
            error: message.to_string(),
            recoverable,
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// HTTP-facing error wrapper for actix handlers.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ApiError(pub EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        ApiError(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError(EngineError::Internal(e))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            EngineError::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
            EngineError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
            EngineError::AlreadyReleased { .. } => StatusCode::CONFLICT,
            EngineError::PaymentMethodNotApproved(_) => StatusCode::BAD_REQUEST,
            EngineError::ExpiredContract(_) => StatusCode::GONE,
            EngineError::ContractNotPending { .. } => StatusCode::CONFLICT,
            EngineError::InvalidEscrowState { .. } => StatusCode::CONFLICT,
            EngineError::FxGateway(_) => StatusCode::BAD_GATEWAY,
            EngineError::ConcurrentModification => StatusCode::SERVICE_UNAVAILABLE,
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match &self.0 {
            EngineError::InsufficientFunds {
                available,
                requested,
            } => ErrorResponse::new("WAL-001", &self.0.to_string(), false).with_details(
                serde_json::json!({ "available": available, "requested": requested }),
            ),
            EngineError::InvalidAmount(_) => {
                ErrorResponse::new("WAL-002", &self.0.to_string(), false)
            }
            EngineError::AlreadyReleased { milestone_id } => {
                ErrorResponse::new("ESC-002", &self.0.to_string(), false)
                    .with_details(serde_json::json!({ "milestone_id": milestone_id }))
            }
            EngineError::InvalidEscrowState {
                status, required, ..
            } => ErrorResponse::new("ESC-003", &self.0.to_string(), true)
                .with_details(serde_json::json!({ "current": status, "required": required })),
            EngineError::PaymentMethodNotApproved(_) => {
                ErrorResponse::new("WDR-001", &self.0.to_string(), false)
            }
            EngineError::ExpiredContract(_) => {
                ErrorResponse::new("WDR-002", &self.0.to_string(), false)
            }
            EngineError::ContractNotPending { status, .. } => {
                ErrorResponse::new("WDR-003", &self.0.to_string(), false)
                    .with_details(serde_json::json!({ "current": status }))
            }
            EngineError::FxGateway(fx) => ErrorResponse::new("FX-001", &self.0.to_string(), true)
                .with_details(serde_json::json!({
                    "provider_code": fx.code,
                    "provider_message": fx.message,
                    "trace_id": fx.trace_id,
                    "occurred_at": fx.occurred_at,
                })),
            EngineError::ConcurrentModification => {
                ErrorResponse::new("WAL-003", &self.0.to_string(), true)
            }
            EngineError::NotFound(_) => ErrorResponse::new("ESC-001", &self.0.to_string(), false),
            EngineError::Forbidden(_) => ErrorResponse::new("AUTH-002", &self.0.to_string(), false),
            EngineError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                ErrorResponse::new("INTERNAL", "Internal server error", true)
            }
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
