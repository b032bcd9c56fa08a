use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use tracing::{info, warn};

use crate::db::with_conn;
use crate::error::ApiError;
use crate::middleware::Identity;
use crate::models::PaymentMethod;
use crate::services::fx_gateway::RecipientDetails;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentMethodRequest {
    pub bank_name: String,
    pub account_holder: String,
    /// Full IBAN; only the last four digits are persisted
    pub iban: String,
    pub target_currency: String,
}

/// Register a bank payout destination and submit it to the provider for
/// verification. The method is returned either way; `approved` and the
/// persisted provider error tell the caller what happened.
#[post("/payment-methods")]
pub async fn create_payment_method(
    identity: Identity,
    state: web::Data<AppState>,
    body: web::Json<CreatePaymentMethodRequest>,
) -> Result<HttpResponse, ApiError> {
    let iban_last4 = body
        .iban
        .get(body.iban.len().saturating_sub(4)..)
        .unwrap_or("")
        .to_string();

    let method = {
        let user_id = identity.user_id.clone();
        let bank_name = body.bank_name.clone();
        let account_holder = body.account_holder.clone();
        let target_currency = body.target_currency.clone();
        with_conn(&state.pool, move |conn| {
            PaymentMethod::create(
                conn,
                &user_id,
                &bank_name,
                &account_holder,
                &iban_last4,
                &target_currency,
            )
        })
        .await?
    };

    let details = RecipientDetails {
        bank_name: body.bank_name.clone(),
        account_holder: body.account_holder.clone(),
        iban: body.iban.clone(),
        target_currency: body.target_currency.clone(),
    };

    let method_id = method.id.clone();
    match state.gateway.verify_recipient(&details).await {
        Ok(recipient_id) => {
            info!(method_id = %method_id, "payment method verified");
            with_conn(&state.pool, move |conn| {
                PaymentMethod::mark_approved(conn, &method_id, &recipient_id)
            })
            .await?;
        }
        Err(e) => {
            warn!(
                method_id = %method_id,
                code = %e.code,
                trace_id = %e.trace_id,
                "payment method verification failed"
            );
            with_conn(&state.pool, move |conn| {
                PaymentMethod::record_verify_failure(conn, &method_id, &e)
            })
            .await?;
        }
    }

    let method_id = method.id;
    let method = with_conn(&state.pool, move |conn| {
        PaymentMethod::find_by_id(conn, &method_id)
    })
    .await?;
    Ok(HttpResponse::Created().json(method))
}

/// The caller's registered payout destinations.
#[get("/payment-methods")]
pub async fn list_payment_methods(
    identity: Identity,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let user_id = identity.user_id.clone();
    let methods = with_conn(&state.pool, move |conn| {
        PaymentMethod::find_by_user(conn, &user_id)
    })
    .await?;
    Ok(HttpResponse::Ok().json(methods))
}
