//! Withdrawal contract lifecycle: quote/hold, approve/settle, and every
//! failure path that must return the hold.

use chrono::Duration;

use server::error::{EngineError, FxGatewayError};
use server::models::ContractStatus;
use server::services::escrow::Role;

use crate::mock_infrastructure::{MockFxGateway, TestContext};

const USER: &str = "freelancer-1";

#[tokio::test]
async fn test_create_contract_places_hold() {
    let ctx = TestContext::new().await;
    let wallet = ctx.seed_wallet(USER, 10_000).await;
    let method_id = ctx.seed_payment_method(USER).await;

    let contract = ctx
        .state
        .withdrawals
        .create_contract(USER, &method_id, 6_000)
        .await
        .expect("create contract");

    assert_eq!(contract.status, ContractStatus::PendingApproval.as_str());
    assert_eq!(contract.requested_amount, 6_000);
    assert_eq!(contract.quote_fee, 90);
    assert_eq!(contract.target_currency, "EUR");

    let wallet = ctx.state.wallets.wallet_by_id(&wallet.id).await.unwrap();
    assert_eq!(wallet.balance, 10_000);
    assert_eq!(wallet.held_amount, 6_000);
    assert_eq!(wallet.available(), 4_000);
}

#[tokio::test]
async fn test_approve_settles_and_consumes_hold() {
    let ctx = TestContext::new().await;
    let wallet = ctx.seed_wallet(USER, 10_000).await;
    let method_id = ctx.seed_payment_method(USER).await;
    let contract = ctx
        .state
        .withdrawals
        .create_contract(USER, &method_id, 6_000)
        .await
        .unwrap();

    let tx = ctx
        .state
        .withdrawals
        .approve(&contract.id, USER, Role::Freelancer)
        .await
        .expect("approve");

    assert_eq!(tx.amount, 6_000);
    assert_eq!(tx.fee, 90);
    assert_eq!(tx.status, "completed");

    let settled = ctx.state.withdrawals.get_contract(&contract.id).await.unwrap();
    assert_eq!(settled.status, ContractStatus::Settled.as_str());
    assert_eq!(
        settled.provider_tx_id.as_deref(),
        Some(format!("xe-tx-{}", contract.quote_id).as_str())
    );

    let wallet = ctx.state.wallets.wallet_by_id(&wallet.id).await.unwrap();
    assert_eq!(wallet.balance, 4_000);
    assert_eq!(wallet.held_amount, 0);
    assert_eq!(wallet.total_withdrawn, 6_000);
    assert_eq!(ctx.gateway.payout_call_count(), 1);
}

#[tokio::test]
async fn test_approve_of_expired_quote_releases_hold_without_payout() {
    let gateway = MockFxGateway::with_quote_ttl(Duration::seconds(-5));
    let ctx = TestContext::with_gateway(gateway).await;
    let wallet = ctx.seed_wallet(USER, 10_000).await;
    let method_id = ctx.seed_payment_method(USER).await;
    let contract = ctx
        .state
        .withdrawals
        .create_contract(USER, &method_id, 6_000)
        .await
        .unwrap();

    let err = ctx
        .state
        .withdrawals
        .approve(&contract.id, USER, Role::Freelancer)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ExpiredContract(_)));

    // The provider was never asked to pay out, and its quote was voided
    assert_eq!(ctx.gateway.payout_call_count(), 0);
    assert_eq!(ctx.gateway.cancel_call_count(), 1);

    let expired = ctx.state.withdrawals.get_contract(&contract.id).await.unwrap();
    assert_eq!(expired.status, ContractStatus::Expired.as_str());

    let wallet = ctx.state.wallets.wallet_by_id(&wallet.id).await.unwrap();
    assert_eq!(wallet.held_amount, 0);
    assert_eq!(wallet.balance, 10_000);

    // The unsettled attempt is logged, but not as a completed entry
    let history = ctx.state.wallets.history(&wallet.id, 10).await.unwrap();
    let failed: Vec<_> = history.iter().filter(|t| t.status == "failed").collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].amount, 6_000);
}

#[tokio::test]
async fn test_payout_failure_resolves_contract_and_releases_hold() {
    let gateway = MockFxGateway::failing_payout(FxGatewayError::new(
        "E100",
        "insufficient provider balance",
        "trace-1",
    ));
    let ctx = TestContext::with_gateway(gateway).await;
    let wallet = ctx.seed_wallet(USER, 10_000).await;
    let method_id = ctx.seed_payment_method(USER).await;
    let contract = ctx
        .state
        .withdrawals
        .create_contract(USER, &method_id, 6_000)
        .await
        .unwrap();

    let err = ctx
        .state
        .withdrawals
        .approve(&contract.id, USER, Role::Freelancer)
        .await
        .unwrap_err();
    match err {
        EngineError::FxGateway(e) => {
            assert_eq!(e.code, "E100");
            assert_eq!(e.trace_id, "trace-1");
        }
        other => panic!("expected FxGateway error, got {other}"),
    }

    let failed = ctx.state.withdrawals.get_contract(&contract.id).await.unwrap();
    assert_eq!(failed.status, ContractStatus::Failed.as_str());
    assert_eq!(failed.failure_code.as_deref(), Some("E100"));
    assert!(failed.failed_at.is_some());

    // Money never left the wallet
    let wallet = ctx.state.wallets.wallet_by_id(&wallet.id).await.unwrap();
    assert_eq!(wallet.held_amount, 0);
    assert_eq!(wallet.balance, 10_000);
    assert_eq!(ctx.gateway.payout_call_count(), 1);
}

#[tokio::test]
async fn test_cancel_releases_hold_and_is_idempotent() {
    let ctx = TestContext::new().await;
    let wallet = ctx.seed_wallet(USER, 10_000).await;
    let method_id = ctx.seed_payment_method(USER).await;
    let contract = ctx
        .state
        .withdrawals
        .create_contract(USER, &method_id, 6_000)
        .await
        .unwrap();

    let status = ctx
        .state
        .withdrawals
        .cancel(&contract.id, "user_cancel")
        .await
        .unwrap();
    assert_eq!(status, ContractStatus::Cancelled);

    // Second cancel observes the terminal state and no-ops
    let status = ctx
        .state
        .withdrawals
        .cancel(&contract.id, "user_cancel")
        .await
        .unwrap();
    assert_eq!(status, ContractStatus::Cancelled);

    let wallet = ctx.state.wallets.wallet_by_id(&wallet.id).await.unwrap();
    assert_eq!(wallet.held_amount, 0);
    assert_eq!(wallet.available(), 10_000);

    // And an approve after cancellation is rejected
    let err = ctx
        .state
        .withdrawals
        .approve(&contract.id, USER, Role::Freelancer)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ContractNotPending { .. }));
}

#[tokio::test]
async fn test_cancel_voids_the_provider_quote() {
    let ctx = TestContext::new().await;
    ctx.seed_wallet(USER, 10_000).await;
    let method_id = ctx.seed_payment_method(USER).await;
    let contract = ctx
        .state
        .withdrawals
        .create_contract(USER, &method_id, 6_000)
        .await
        .unwrap();

    ctx.state
        .withdrawals
        .cancel(&contract.id, "user_cancel")
        .await
        .unwrap();
    assert_eq!(ctx.gateway.cancel_call_count(), 1);

    // The losing second cancel owes the provider nothing
    ctx.state
        .withdrawals
        .cancel(&contract.id, "user_cancel")
        .await
        .unwrap();
    assert_eq!(ctx.gateway.cancel_call_count(), 1);
}

#[tokio::test]
async fn test_provider_cancel_failure_does_not_block_cancellation() {
    let gateway = MockFxGateway::failing_cancel(FxGatewayError::new(
        "E503",
        "provider unavailable",
        "trace-2",
    ));
    let ctx = TestContext::with_gateway(gateway).await;
    let wallet = ctx.seed_wallet(USER, 10_000).await;
    let method_id = ctx.seed_payment_method(USER).await;
    let contract = ctx
        .state
        .withdrawals
        .create_contract(USER, &method_id, 6_000)
        .await
        .unwrap();

    // Voiding the quote is best effort; the ledger resolves regardless
    let status = ctx
        .state
        .withdrawals
        .cancel(&contract.id, "user_cancel")
        .await
        .unwrap();
    assert_eq!(status, ContractStatus::Cancelled);
    assert_eq!(ctx.gateway.cancel_call_count(), 1);

    let wallet = ctx.state.wallets.wallet_by_id(&wallet.id).await.unwrap();
    assert_eq!(wallet.held_amount, 0);
    assert_eq!(wallet.available(), 10_000);
}

#[tokio::test]
async fn test_settlement_write_retries_transient_contention() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use server::db::with_transaction_retry;
    use server::error::EngineResult;
    use server::models::Wallet;

    let ctx = TestContext::new().await;
    let wallet = ctx.seed_wallet(USER, 10_000).await;

    // The first two attempts lose a lock race; the third lands
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let wallet_id = wallet.id.clone();
    let result = with_transaction_retry(&ctx.state.pool, 3, move |conn| {
        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
            return Err(EngineError::ConcurrentModification);
        }
        Wallet::credit(conn, &wallet_id, 250, false)
    })
    .await;
    assert!(result.is_ok());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);

    let wallet = ctx.state.wallets.wallet_by_id(&wallet.id).await.unwrap();
    assert_eq!(wallet.balance, 10_250);

    // An exhausted budget surfaces the contention error
    let result = with_transaction_retry(&ctx.state.pool, 2, |_conn| -> EngineResult<()> {
        Err(EngineError::ConcurrentModification)
    })
    .await;
    assert!(matches!(result, Err(EngineError::ConcurrentModification)));
}

#[tokio::test]
async fn test_only_one_pending_contract_per_wallet() {
    let ctx = TestContext::new().await;
    ctx.seed_wallet(USER, 10_000).await;
    let method_id = ctx.seed_payment_method(USER).await;

    ctx.state
        .withdrawals
        .create_contract(USER, &method_id, 2_000)
        .await
        .unwrap();
    let err = ctx
        .state
        .withdrawals
        .create_contract(USER, &method_id, 1_000)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ContractNotPending { .. }));

    // The rejected attempt rolled its hold back with it
    let wallet = ctx
        .state
        .wallets
        .wallet_for_user(USER)
        .await
        .unwrap();
    assert_eq!(wallet.held_amount, 2_000);
}

#[tokio::test]
async fn test_create_contract_validations() {
    let ctx = TestContext::new().await;
    ctx.seed_wallet(USER, 1_000).await;
    let method_id = ctx.seed_payment_method(USER).await;

    let err = ctx
        .state
        .withdrawals
        .create_contract(USER, &method_id, 0)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidAmount(0)));

    let err = ctx
        .state
        .withdrawals
        .create_contract(USER, &method_id, 2_000)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientFunds {
            available: 1_000,
            requested: 2_000,
        }
    ));
}

#[tokio::test]
async fn test_unapproved_payment_method_is_rejected() {
    use server::db::with_conn;
    use server::models::PaymentMethod;

    let ctx = TestContext::new().await;
    ctx.seed_wallet(USER, 10_000).await;

    let method = with_conn(&ctx.state.pool, |conn| {
        PaymentMethod::create(conn, USER, "Test Bank", "Test Holder", "6789", "EUR")
    })
    .await
    .unwrap();

    let err = ctx
        .state
        .withdrawals
        .create_contract(USER, &method.id, 1_000)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PaymentMethodNotApproved(_)));
}

#[tokio::test]
async fn test_contract_ownership_is_enforced() {
    let ctx = TestContext::new().await;
    ctx.seed_wallet(USER, 10_000).await;
    ctx.seed_wallet("other-user", 10_000).await;
    let method_id = ctx.seed_payment_method(USER).await;
    let contract = ctx
        .state
        .withdrawals
        .create_contract(USER, &method_id, 1_000)
        .await
        .unwrap();

    // Another user cannot approve, but an admin can
    let err = ctx
        .state
        .withdrawals
        .approve(&contract.id, "other-user", Role::Freelancer)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));

    ctx.state
        .withdrawals
        .approve(&contract.id, "admin-1", Role::Admin)
        .await
        .expect("admin approve");

    // Nor can they spend someone else's payment method
    let err = ctx
        .state
        .withdrawals
        .create_contract("other-user", &method_id, 1_000)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Forbidden(_)));
}
