//! Ledger-wide reconciliation: wallet balances plus live escrow remainders
//! must stay constant through every flow, shrinking only when a settled
//! withdrawal actually leaves the system.

use chrono::Duration;
use diesel::prelude::*;

use server::db::with_conn;
use server::error::FxGatewayError;
use server::models::{Escrow, Transaction, Wallet};
use server::schema::transactions;
use server::services::escrow::Role;

use crate::mock_infrastructure::{MockFxGateway, TestContext};

const CLIENT: &str = "client-1";
const FREELANCER: &str = "freelancer-1";

/// Everything the ledger currently accounts for: wallet balances plus the
/// unreleased remainder of live escrows.
async fn system_total(ctx: &TestContext) -> i64 {
    with_conn(&ctx.state.pool, |conn| {
        Ok(Wallet::total_balance(conn)? + Escrow::total_remaining(conn)?)
    })
    .await
    .expect("reconciliation query")
}

async fn all_transactions(ctx: &TestContext) -> Vec<Transaction> {
    with_conn(&ctx.state.pool, |conn| {
        transactions::table
            .load(conn)
            .map_err(|e| server::error::EngineError::Internal(e.into()))
    })
    .await
    .expect("load transactions")
}

#[tokio::test]
async fn test_escrow_flows_conserve_the_ledger() {
    let ctx = TestContext::new().await;
    ctx.seed_wallet(CLIENT, 100_000).await;
    assert_eq!(system_total(&ctx).await, 100_000);

    // Funding moves money between buckets, never out of the system
    let funded = ctx
        .state
        .escrows
        .fund_escrow("project-1", CLIENT, FREELANCER, vec![40_000, 60_000])
        .await
        .unwrap();
    assert_eq!(system_total(&ctx).await, 100_000);

    // Release splits gross between freelancer and platform wallets
    ctx.state
        .escrows
        .release_milestone(&funded.escrow.id, &funded.milestones[0].id, CLIENT, Role::Client)
        .await
        .unwrap();
    assert_eq!(system_total(&ctx).await, 100_000);

    // Dispute and refund return the remainder to the client
    ctx.state
        .escrows
        .mark_disputed(&funded.escrow.id, CLIENT, Role::Client, "quality dispute")
        .await
        .unwrap();
    ctx.state
        .escrows
        .resolve_dispute(&funded.escrow.id, Role::Admin, "refund")
        .await
        .unwrap();
    assert_eq!(system_total(&ctx).await, 100_000);
}

#[tokio::test]
async fn test_settled_withdrawal_is_the_only_exit() {
    let ctx = TestContext::new().await;
    ctx.seed_wallet(FREELANCER, 50_000).await;
    let method_id = ctx.seed_payment_method(FREELANCER).await;

    // A hold is not an exit
    let contract = ctx
        .state
        .withdrawals
        .create_contract(FREELANCER, &method_id, 20_000)
        .await
        .unwrap();
    assert_eq!(system_total(&ctx).await, 50_000);

    // Settlement is
    ctx.state
        .withdrawals
        .approve(&contract.id, FREELANCER, Role::Freelancer)
        .await
        .unwrap();
    assert_eq!(system_total(&ctx).await, 30_000);
}

#[tokio::test]
async fn test_failed_withdrawal_paths_leak_nothing() {
    for gateway in [
        MockFxGateway::with_quote_ttl(Duration::seconds(-5)),
        MockFxGateway::failing_payout(FxGatewayError::new("E100", "provider rejected", "trace-9")),
    ] {
        let ctx = TestContext::with_gateway(gateway).await;
        ctx.seed_wallet(FREELANCER, 50_000).await;
        let method_id = ctx.seed_payment_method(FREELANCER).await;

        let contract = ctx
            .state
            .withdrawals
            .create_contract(FREELANCER, &method_id, 20_000)
            .await
            .unwrap();
        let _ = ctx
            .state
            .withdrawals
            .approve(&contract.id, FREELANCER, Role::Freelancer)
            .await;

        assert_eq!(system_total(&ctx).await, 50_000);
        let wallet = ctx.state.wallets.wallet_for_user(FREELANCER).await.unwrap();
        assert_eq!(wallet.held_amount, 0);
    }
}

#[tokio::test]
async fn test_every_completed_entry_reconciles_fee_and_net() {
    let ctx = TestContext::new().await;
    ctx.seed_wallet(CLIENT, 100_000).await;
    let method_id = ctx.seed_payment_method(FREELANCER).await;

    let funded = ctx
        .state
        .escrows
        .fund_escrow("project-1", CLIENT, FREELANCER, vec![40_000, 60_000])
        .await
        .unwrap();
    for milestone in &funded.milestones {
        ctx.state
            .escrows
            .release_milestone(&funded.escrow.id, &milestone.id, CLIENT, Role::Client)
            .await
            .unwrap();
    }
    let contract = ctx
        .state
        .withdrawals
        .create_contract(FREELANCER, &method_id, 30_000)
        .await
        .unwrap();
    ctx.state
        .withdrawals
        .approve(&contract.id, FREELANCER, Role::Freelancer)
        .await
        .unwrap();

    let entries = all_transactions(&ctx).await;
    assert!(!entries.is_empty());
    for tx in &entries {
        assert!(tx.amount > 0, "non-positive amount on {}", tx.id);
        assert_eq!(
            tx.fee + tx.net_amount,
            tx.amount,
            "fee + net != amount on {} ({})",
            tx.id,
            tx.tx_type
        );
    }

    // Milestone fees match the platform wallet balance
    let platform_fees: i64 = entries
        .iter()
        .filter(|t| t.tx_type == "platform_fee" && t.status == "completed")
        .map(|t| t.amount)
        .sum();
    let platform_wallet = ctx.state.wallets.wallet_for_user("platform").await.unwrap();
    assert_eq!(platform_wallet.balance, platform_fees);
}
