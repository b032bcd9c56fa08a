use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, EngineError};
use crate::middleware::Identity;
use crate::models::{Escrow, Milestone, Transaction};
use crate::services::escrow::Role;
use crate::AppState;

/// Request body for funding an escrow
#[derive(Debug, Deserialize)]
pub struct FundEscrowRequest {
    pub project_id: String,
    pub freelancer_id: String,
    /// Ordered milestone amounts in minor units; their sum is the locked total
    pub milestones: Vec<i64>,
}

#[derive(Serialize)]
pub struct EscrowResponse {
    pub escrow: Escrow,
    pub milestones: Vec<Milestone>,
    pub remaining_amount: i64,
}

/// Fund an escrow for an awarded project.
///
/// Only a client (or admin) may lock a budget. The full amount is debited
/// from the caller's wallet immediately.
#[post("/escrows/fund")]
pub async fn fund_escrow(
    identity: Identity,
    state: web::Data<AppState>,
    body: web::Json<FundEscrowRequest>,
) -> Result<HttpResponse, ApiError> {
    if identity.role == Role::Freelancer {
        return Err(ApiError(EngineError::Forbidden(
            "freelancers cannot fund escrows".to_string(),
        )));
    }

    let funded = state
        .escrows
        .fund_escrow(
            &body.project_id,
            &identity.user_id,
            &body.freelancer_id,
            body.milestones.clone(),
        )
        .await?;

    info!(
        escrow_id = %funded.escrow.id,
        client_id = %identity.user_id,
        "escrow funded via api"
    );
    let remaining = funded.escrow.remaining_amount();
    Ok(HttpResponse::Created().json(EscrowResponse {
        escrow: funded.escrow,
        milestones: funded.milestones,
        remaining_amount: remaining,
    }))
}

/// Escrow snapshot with milestones.
#[get("/escrows/{id}")]
pub async fn get_escrow(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let (escrow, milestones) = state.escrows.get_escrow(&path).await?;
    if !identity.is_admin()
        && escrow.client_id != identity.user_id
        && escrow.freelancer_id != identity.user_id
    {
        return Err(ApiError(EngineError::Forbidden(
            "not a party to this escrow".to_string(),
        )));
    }

    let remaining = escrow.remaining_amount();
    Ok(HttpResponse::Ok().json(EscrowResponse {
        escrow,
        milestones,
        remaining_amount: remaining,
    }))
}

#[derive(Serialize)]
pub struct ReleaseResponse {
    pub transaction: Transaction,
}

/// Release one milestone to the freelancer. Safe to retry: a repeat call
/// returns the original release transaction.
#[post("/escrows/{id}/milestones/{milestone_id}/release")]
pub async fn release_milestone(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (escrow_id, milestone_id) = path.into_inner();
    let transaction = state
        .escrows
        .release_milestone(&escrow_id, &milestone_id, &identity.user_id, identity.role)
        .await?;
    Ok(HttpResponse::Ok().json(ReleaseResponse { transaction }))
}

/// Mark a milestone deliverable as approved by the client.
#[post("/escrows/{id}/milestones/{milestone_id}/approve")]
pub async fn approve_milestone(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, ApiError> {
    let (escrow_id, milestone_id) = path.into_inner();
    let milestone = state
        .escrows
        .approve_milestone(&escrow_id, &milestone_id, &identity.user_id, identity.role)
        .await?;
    Ok(HttpResponse::Ok().json(milestone))
}

#[derive(Serialize)]
pub struct RefundResponse {
    pub escrow: Escrow,
    pub refund: Option<Transaction>,
}

/// Close the escrow and return the unreleased remainder to the client.
#[post("/escrows/{id}/refund-excess")]
pub async fn refund_excess(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let escrow_id = path.into_inner();
    let (escrow, _) = state.escrows.get_escrow(&escrow_id).await?;
    if !identity.is_admin() && escrow.client_id != identity.user_id {
        return Err(ApiError(EngineError::Forbidden(
            "only the escrow client or an admin may close it".to_string(),
        )));
    }

    let refund = state.escrows.refund_excess(&escrow_id).await?;
    let (escrow, _) = state.escrows.get_escrow(&escrow_id).await?;
    Ok(HttpResponse::Ok().json(RefundResponse { escrow, refund }))
}

#[derive(Debug, Deserialize)]
pub struct DisputeRequest {
    pub reason: String,
}

/// Open a dispute, freezing milestone releases.
#[post("/escrows/{id}/dispute")]
pub async fn dispute_escrow(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<DisputeRequest>,
) -> Result<HttpResponse, ApiError> {
    let escrow = state
        .escrows
        .mark_disputed(&path, &identity.user_id, identity.role, &body.reason)
        .await?;
    Ok(HttpResponse::Ok().json(escrow))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    /// "release" to unfreeze, "refund" to return the remainder to the client
    pub decision: String,
}

/// Resolve a dispute (admin only).
#[post("/escrows/{id}/resolve")]
pub async fn resolve_dispute(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ResolveRequest>,
) -> Result<HttpResponse, ApiError> {
    if !matches!(body.decision.as_str(), "release" | "refund") {
        return Ok(HttpResponse::BadRequest().json(crate::error::ErrorResponse::new(
            "ESC-004",
            "decision must be \"release\" or \"refund\"",
            true,
        )));
    }
    let escrow = state
        .escrows
        .resolve_dispute(&path, identity.role, &body.decision)
        .await?;
    Ok(HttpResponse::Ok().json(escrow))
}
