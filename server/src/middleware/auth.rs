//! Authenticated caller identity
//!
//! The identity layer in front of this service authenticates the user and
//! forwards `X-User-Id` and `X-User-Role` headers. The engine trusts those
//! headers and performs its own authorization checks against the entities
//! involved (escrow parties, wallet owner).

use std::future::{ready, Ready};

use actix_web::{dev::Payload, FromRequest, HttpRequest};

use crate::error::{ApiError, EngineError};
use crate::services::escrow::Role;

pub const USER_ID_HEADER: &str = "X-User-Id";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

/// The authenticated caller, extracted from trusted gateway headers.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

impl FromRequest for Identity {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract_identity(req))
    }
}

fn extract_identity(req: &HttpRequest) -> Result<Identity, ApiError> {
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .ok_or_else(|| ApiError(EngineError::Forbidden("missing caller identity".to_string())))?;

    let role = req
        .headers()
        .get(USER_ROLE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(Role::parse)
        .ok_or_else(|| ApiError(EngineError::Forbidden("missing or unknown caller role".to_string())))?;

    Ok(Identity { user_id, role })
}
