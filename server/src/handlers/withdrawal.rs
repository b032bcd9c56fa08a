use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, EngineError};
use crate::middleware::Identity;
use crate::models::{ContractStatus, Transaction, WithdrawalContract};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateWithdrawalRequest {
    pub payment_method_id: String,
    /// Amount to withdraw in minor units of the ledger currency
    pub amount: i64,
}

/// Request a withdrawal: quote the conversion, hold the funds, open a
/// `pending_approval` contract the caller must approve before the quote
/// expires.
#[post("/withdrawals")]
pub async fn create_withdrawal(
    identity: Identity,
    state: web::Data<AppState>,
    body: web::Json<CreateWithdrawalRequest>,
) -> Result<HttpResponse, ApiError> {
    let contract = state
        .withdrawals
        .create_contract(&identity.user_id, &body.payment_method_id, body.amount)
        .await?;

    info!(
        contract_id = %contract.id,
        user_id = %identity.user_id,
        "withdrawal requested"
    );
    Ok(HttpResponse::Created().json(contract))
}

/// Contract snapshot; the client renders its countdown purely from
/// `quote_expires_at`.
#[get("/withdrawals/{id}")]
pub async fn get_withdrawal(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let contract = state.withdrawals.get_contract(&path).await?;
    authorize_contract(&identity, &state, &contract).await?;
    Ok(HttpResponse::Ok().json(contract))
}

#[derive(Serialize)]
pub struct ApproveResponse {
    pub transaction: Transaction,
    pub status: ContractStatus,
}

/// Approve a pending contract, confirming the payout with the provider and
/// settling the hold.
#[post("/withdrawals/{id}/approve")]
pub async fn approve_withdrawal(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let transaction = state
        .withdrawals
        .approve(&path, &identity.user_id, identity.role)
        .await?;
    Ok(HttpResponse::Ok().json(ApproveResponse {
        transaction,
        status: ContractStatus::Settled,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    /// Trigger that fired: "user_cancel", "countdown_elapsed",
    /// "client_disconnected". Recorded on the contract for diagnosis.
    #[serde(default = "default_cancel_reason")]
    pub reason: String,
}

fn default_cancel_reason() -> String {
    "user_cancel".to_string()
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub status: ContractStatus,
}

/// Cancel a pending contract. Idempotent: repeated calls, or a cancel
/// racing the expiry sweep, all converge on one terminal state.
#[post("/withdrawals/{id}/cancel")]
pub async fn cancel_withdrawal(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<CancelRequest>,
) -> Result<HttpResponse, ApiError> {
    let contract = state.withdrawals.get_contract(&path).await?;
    authorize_contract(&identity, &state, &contract).await?;

    let status = state.withdrawals.cancel(&contract.id, &body.reason).await?;
    Ok(HttpResponse::Ok().json(CancelResponse { status }))
}

async fn authorize_contract(
    identity: &Identity,
    state: &web::Data<AppState>,
    contract: &WithdrawalContract,
) -> Result<(), ApiError> {
    if identity.is_admin() {
        return Ok(());
    }
    let wallet = state.wallets.wallet_by_id(&contract.wallet_id).await?;
    if wallet.user_id != identity.user_id {
        return Err(ApiError(EngineError::Forbidden(
            "contract belongs to another user".to_string(),
        )));
    }
    Ok(())
}
