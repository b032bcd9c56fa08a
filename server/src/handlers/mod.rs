//! HTTP handlers
//!
//! Thin translation layer: extract the caller identity, hand off to a
//! service, render the result. No business rules live here.

pub mod escrow;
pub mod health;
pub mod notification;
pub mod payment_method;
pub mod wallet;
pub mod withdrawal;

use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(escrow::fund_escrow)
            .service(escrow::get_escrow)
            .service(escrow::approve_milestone)
            .service(escrow::release_milestone)
            .service(escrow::refund_excess)
            .service(escrow::dispute_escrow)
            .service(escrow::resolve_dispute)
            .service(notification::list_notifications)
            .service(wallet::get_wallet)
            .service(wallet::get_wallet_transactions)
            .service(payment_method::create_payment_method)
            .service(payment_method::list_payment_methods)
            .service(withdrawal::create_withdrawal)
            .service(withdrawal::get_withdrawal)
            .service(withdrawal::approve_withdrawal)
            .service(withdrawal::cancel_withdrawal),
    )
    .service(health::health_check);
}
