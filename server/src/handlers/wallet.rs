use actix_web::{get, web, HttpResponse};
use serde::Serialize;

use crate::error::{ApiError, EngineError};
use crate::middleware::Identity;
use crate::models::{Transaction, Wallet};
use crate::AppState;

/// Wallet snapshot as rendered to the owner.
#[derive(Serialize)]
pub struct WalletSnapshot {
    pub wallet: Wallet,
    /// Spendable funds: balance minus held amount
    pub available: i64,
}

/// Wallet snapshot for a user. Owner or admin only.
#[get("/wallets/{user_id}")]
pub async fn get_wallet(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();
    if !identity.is_admin() && identity.user_id != user_id {
        return Err(ApiError(EngineError::Forbidden(
            "wallets are visible to their owner only".to_string(),
        )));
    }

    let wallet = state.wallets.wallet_for_user(&user_id).await?;
    let available = wallet.available();
    Ok(HttpResponse::Ok().json(WalletSnapshot { wallet, available }))
}

#[derive(Serialize)]
pub struct TransactionsResponse {
    pub transactions: Vec<Transaction>,
}

/// Recent transaction history for a user's wallet, newest first.
#[get("/wallets/{user_id}/transactions")]
pub async fn get_wallet_transactions(
    identity: Identity,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let user_id = path.into_inner();
    if !identity.is_admin() && identity.user_id != user_id {
        return Err(ApiError(EngineError::Forbidden(
            "wallets are visible to their owner only".to_string(),
        )));
    }

    let wallet = state.wallets.wallet_for_user(&user_id).await?;
    let transactions = state.wallets.history(&wallet.id, 100).await?;
    Ok(HttpResponse::Ok().json(TransactionsResponse { transactions }))
}
