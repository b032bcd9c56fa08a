//! Multi-trigger cancellation: user cancel, countdown expiry, the server
//! sweep, and approve all race for the same contract; exactly one must win.

use std::sync::Arc;

use chrono::Duration;

use server::config::WatchdogConfig;
use server::error::EngineError;
use server::models::ContractStatus;
use server::services::escrow::Role;

use crate::mock_infrastructure::{MockFxGateway, TestContext};

const USER: &str = "freelancer-1";

async fn open_contract(ctx: &TestContext, amount: i64) -> String {
    ctx.seed_wallet(USER, 10_000).await;
    let method_id = ctx.seed_payment_method(USER).await;
    ctx.state
        .withdrawals
        .create_contract(USER, &method_id, amount)
        .await
        .expect("create contract")
        .id
}

#[tokio::test]
async fn test_concurrent_triggers_release_the_hold_exactly_once() {
    let ctx = Arc::new(TestContext::new().await);
    let contract_id = open_contract(&ctx, 6_000).await;

    // User cancel, a second user cancel, and two expiry triggers, all at once
    let mut tasks = Vec::new();
    for trigger in 0..4 {
        let ctx = Arc::clone(&ctx);
        let contract_id = contract_id.clone();
        tasks.push(tokio::spawn(async move {
            if trigger < 2 {
                ctx.state.withdrawals.cancel(&contract_id, "user_cancel").await
            } else {
                ctx.state.withdrawals.expire(&contract_id).await
            }
        }));
    }

    let mut outcomes = Vec::new();
    for task in tasks {
        outcomes.push(task.await.expect("join").expect("trigger"));
    }

    // Every trigger converges on the same terminal status
    let final_status = outcomes[0];
    assert!(final_status.is_terminal());
    assert!(outcomes.iter().all(|s| *s == final_status));

    // The hold came back exactly once and exactly one attempt was logged
    let wallet = ctx.state.wallets.wallet_for_user(USER).await.unwrap();
    assert_eq!(wallet.held_amount, 0);
    assert_eq!(wallet.balance, 10_000);

    let history = ctx.state.wallets.history(&wallet.id, 20).await.unwrap();
    let unsettled = history.iter().filter(|t| t.status == "failed").count();
    assert_eq!(unsettled, 1);
}

#[tokio::test]
async fn test_approve_claim_beats_the_sweep() {
    let ctx = TestContext::new().await;
    let contract_id = open_contract(&ctx, 6_000).await;

    // Approve claims the contract before the provider call, so a sweep
    // that fires afterwards finds nothing pending
    ctx.state
        .withdrawals
        .approve(&contract_id, USER, Role::Freelancer)
        .await
        .expect("approve");

    let watchdog = ctx.state.watchdog(WatchdogConfig::default());
    assert_eq!(watchdog.sweep_once().await.unwrap(), 0);

    let contract = ctx.state.withdrawals.get_contract(&contract_id).await.unwrap();
    assert_eq!(contract.status, ContractStatus::Settled.as_str());
    assert_eq!(ctx.gateway.payout_call_count(), 1);
}

#[tokio::test]
async fn test_sweep_beats_a_late_approve() {
    let gateway = MockFxGateway::with_quote_ttl(Duration::seconds(-5));
    let ctx = TestContext::with_gateway(gateway).await;
    let contract_id = open_contract(&ctx, 6_000).await;

    let watchdog = ctx.state.watchdog(WatchdogConfig::default());
    assert_eq!(watchdog.sweep_once().await.unwrap(), 1);

    let err = ctx
        .state
        .withdrawals
        .approve(&contract_id, USER, Role::Freelancer)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ExpiredContract(_)));

    // Exactly one of the two outcomes happened, and it was the expiry
    let contract = ctx.state.withdrawals.get_contract(&contract_id).await.unwrap();
    assert_eq!(contract.status, ContractStatus::Expired.as_str());
    assert_eq!(ctx.gateway.payout_call_count(), 0);

    let wallet = ctx.state.wallets.wallet_for_user(USER).await.unwrap();
    assert_eq!(wallet.held_amount, 0);
}

#[tokio::test]
async fn test_cancel_after_settlement_does_not_claw_back() {
    let ctx = TestContext::new().await;
    let contract_id = open_contract(&ctx, 6_000).await;

    ctx.state
        .withdrawals
        .approve(&contract_id, USER, Role::Freelancer)
        .await
        .unwrap();

    // A late cancel trigger observes the settled contract and no-ops
    let status = ctx
        .state
        .withdrawals
        .cancel(&contract_id, "user_cancel")
        .await
        .unwrap();
    assert_eq!(status, ContractStatus::Settled);

    let wallet = ctx.state.wallets.wallet_for_user(USER).await.unwrap();
    assert_eq!(wallet.balance, 4_000);
    assert_eq!(wallet.held_amount, 0);
}

#[tokio::test]
async fn test_sweep_leaves_live_quotes_alone() {
    let ctx = TestContext::new().await;
    let contract_id = open_contract(&ctx, 6_000).await;

    let watchdog = ctx.state.watchdog(WatchdogConfig::default());
    assert_eq!(watchdog.sweep_once().await.unwrap(), 0);

    let contract = ctx.state.withdrawals.get_contract(&contract_id).await.unwrap();
    assert_eq!(contract.status, ContractStatus::PendingApproval.as_str());
}
