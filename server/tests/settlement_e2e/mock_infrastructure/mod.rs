//! Shared test fixtures: temp-file database and a scripted FX gateway.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::TempDir;
use uuid::Uuid;

use server::db::{create_pool, run_migrations};
use server::error::FxGatewayError;
use server::models::{NewTransaction, TxType, Wallet};
use server::services::fx_gateway::{FxGateway, FxQuote, PayoutConfirmation, RecipientDetails};
use server::AppState;

/// A settlement engine wired to a throwaway database and a mock provider.
pub struct TestContext {
    pub state: AppState,
    pub gateway: Arc<MockFxGateway>,
    _tmp: TempDir,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_gateway(Arc::new(MockFxGateway::default())).await
    }

    pub async fn with_gateway(gateway: Arc<MockFxGateway>) -> Self {
        let tmp = TempDir::new().expect("temp dir");
        let db_path = tmp.path().join("settlement_test.db");
        let pool = Arc::new(
            create_pool(db_path.to_str().expect("utf8 path")).expect("create pool"),
        );
        run_migrations(&pool).expect("migrations");

        let state = AppState::build(Arc::clone(&pool), gateway.clone() as Arc<dyn FxGateway>);
        Self {
            state,
            gateway,
            _tmp: tmp,
        }
    }

    /// Create (if needed) and fund a user's wallet, returning the wallet.
    pub async fn seed_wallet(&self, user_id: &str, amount: i64) -> Wallet {
        let wallet = self
            .state
            .wallets
            .wallet_for_user(user_id)
            .await
            .expect("wallet");
        if amount > 0 {
            self.state
                .wallets
                .credit(
                    &wallet.id,
                    amount,
                    NewTransaction::completed(&wallet.id, TxType::Deposit, amount),
                )
                .await
                .expect("seed credit");
        }
        self.state.wallets.wallet_by_id(&wallet.id).await.expect("reload")
    }

    /// Register an approved payout destination for the user.
    pub async fn seed_payment_method(&self, user_id: &str) -> String {
        use server::db::with_conn;
        use server::models::PaymentMethod;

        let user = user_id.to_string();
        with_conn(&self.state.pool, move |conn| {
            let method =
                PaymentMethod::create(conn, &user, "Test Bank", "Test Holder", "6789", "EUR")?;
            PaymentMethod::mark_approved(conn, &method.id, "recipient-test")?;
            PaymentMethod::find_by_id(conn, &method.id)
        })
        .await
        .expect("payment method")
        .id
    }
}

/// Scripted FX provider. Quotes are deterministic: rate 1:0.9, fee 1.5%,
/// expiry `quote_ttl` from now (negative TTLs produce already-dead quotes).
pub struct MockFxGateway {
    pub quote_ttl: Mutex<Duration>,
    pub fail_quote: Mutex<Option<FxGatewayError>>,
    pub fail_payout: Mutex<Option<FxGatewayError>>,
    pub fail_cancel: Mutex<Option<FxGatewayError>>,
    pub payout_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl Default for MockFxGateway {
    fn default() -> Self {
        Self {
            quote_ttl: Mutex::new(Duration::seconds(300)),
            fail_quote: Mutex::new(None),
            fail_payout: Mutex::new(None),
            fail_cancel: Mutex::new(None),
            payout_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }
}

impl MockFxGateway {
    pub fn with_quote_ttl(ttl: Duration) -> Arc<Self> {
        let gateway = Self::default();
        *gateway.quote_ttl.lock().unwrap() = ttl;
        Arc::new(gateway)
    }

    pub fn failing_payout(error: FxGatewayError) -> Arc<Self> {
        let gateway = Self::default();
        *gateway.fail_payout.lock().unwrap() = Some(error);
        Arc::new(gateway)
    }

    pub fn failing_cancel(error: FxGatewayError) -> Arc<Self> {
        let gateway = Self::default();
        *gateway.fail_cancel.lock().unwrap() = Some(error);
        Arc::new(gateway)
    }

    pub fn payout_call_count(&self) -> usize {
        self.payout_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_call_count(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FxGateway for MockFxGateway {
    async fn request_quote(
        &self,
        source_amount: i64,
        target_currency: &str,
    ) -> Result<FxQuote, FxGatewayError> {
        if let Some(e) = self.fail_quote.lock().unwrap().clone() {
            return Err(e);
        }
        let ttl = *self.quote_ttl.lock().unwrap();
        let fee = source_amount * 150 / 10_000;
        Ok(FxQuote {
            quote_id: format!("quote-{}", Uuid::new_v4()),
            source_amount,
            target_amount: (source_amount - fee) * 9 / 10,
            rate: "0.9000".to_string(),
            fee,
            target_currency: target_currency.to_string(),
            expires_at: (Utc::now() + ttl).naive_utc(),
        })
    }

    async fn confirm_payout(
        &self,
        quote_id: &str,
        _recipient_id: &str,
    ) -> Result<PayoutConfirmation, FxGatewayError> {
        self.payout_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.fail_payout.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(PayoutConfirmation {
            provider_tx_id: format!("xe-tx-{}", quote_id),
        })
    }

    async fn cancel_payout(&self, _quote_id: &str) -> Result<(), FxGatewayError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.fail_cancel.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(())
    }

    async fn verify_recipient(
        &self,
        _details: &RecipientDetails,
    ) -> Result<String, FxGatewayError> {
        Ok(format!("recipient-{}", Uuid::new_v4()))
    }
}
