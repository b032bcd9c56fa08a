//! FX gateway adapter
//!
//! Boundary to the external payout provider ("XE"). Everything money-moving
//! behind this trait: quoting a conversion, verifying a bank recipient, and
//! confirming a payout. Provider failures surface as [`FxGatewayError`] with
//! the provider's own code, message and trace id intact, because that detail
//! is what support shows the user.

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::config::FxGatewayConfig;
use crate::error::FxGatewayError;

/// A priced, time-boxed conversion offer from the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FxQuote {
    pub quote_id: String,
    /// Amount to convert, minor units of the ledger currency
    pub source_amount: i64,
    /// Amount the recipient receives, minor units of the target currency
    pub target_amount: i64,
    /// Exchange rate as quoted, kept as the provider's decimal string
    pub rate: String,
    /// Provider withdrawal fee, minor units of the ledger currency
    pub fee: i64,
    pub target_currency: String,
    /// Hard deadline; the quote is worthless after this instant
    pub expires_at: NaiveDateTime,
}

/// Provider acknowledgement of an executed payout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutConfirmation {
    pub provider_tx_id: String,
}

/// Bank destination submitted for provider-side verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientDetails {
    pub bank_name: String,
    pub account_holder: String,
    pub iban: String,
    pub target_currency: String,
}

/// Seam to the payout provider. Production uses [`XeHttpGateway`]; tests
/// substitute a scripted mock.
#[async_trait]
pub trait FxGateway: Send + Sync {
    /// Price a conversion of `source_amount` into `target_currency`.
    async fn request_quote(
        &self,
        source_amount: i64,
        target_currency: &str,
    ) -> Result<FxQuote, FxGatewayError>;

    /// Execute the payout a quote priced. Must only be called once the
    /// contract holding the quote has been claimed.
    async fn confirm_payout(
        &self,
        quote_id: &str,
        recipient_id: &str,
    ) -> Result<PayoutConfirmation, FxGatewayError>;

    /// Void a quote whose payout will never be confirmed. Best effort: the
    /// ledger resolves the contract whether or not the provider answers.
    async fn cancel_payout(&self, quote_id: &str) -> Result<(), FxGatewayError>;

    /// Verify a bank recipient; returns the provider's recipient id.
    async fn verify_recipient(
        &self,
        details: &RecipientDetails,
    ) -> Result<String, FxGatewayError>;
}

/// HTTP client for the XE payout API.
pub struct XeHttpGateway {
    client: reqwest::Client,
    config: FxGatewayConfig,
}

#[derive(Debug, Deserialize)]
struct XeErrorBody {
    code: String,
    message: String,
    trace_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct QuoteRequest<'a> {
    source_currency: &'a str,
    target_currency: &'a str,
    source_amount: i64,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    quote_id: String,
    target_amount: i64,
    rate: String,
    fee: i64,
    expires_at: NaiveDateTime,
}

#[derive(Debug, Serialize)]
struct PayoutRequest<'a> {
    quote_id: &'a str,
    recipient_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct PayoutResponse {
    transaction_id: String,
}

#[derive(Debug, Deserialize)]
struct CancelResponse {
    cancelled: bool,
}

#[derive(Debug, Deserialize)]
struct RecipientResponse {
    recipient_id: String,
}

impl XeHttpGateway {
    pub fn new(config: FxGatewayConfig) -> Result<Self, FxGatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| FxGatewayError::transport(&e.to_string()))?;
        Ok(Self { client, config })
    }

    /// Translate a provider response into either the expected body or a
    /// structured gateway error.
    async fn decode<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, FxGatewayError> {
        if response.status().is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| FxGatewayError::transport(&format!("malformed response: {}", e)));
        }

        let status = response.status();
        match response.json::<XeErrorBody>().await {
            Ok(body) => Err(FxGatewayError::new(
                &body.code,
                &body.message,
                body.trace_id.as_deref().unwrap_or("-"),
            )),
            Err(_) => Err(FxGatewayError::transport(&format!(
                "provider returned {} with unreadable body",
                status
            ))),
        }
    }

    async fn post<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, FxGatewayError> {
        let url = format!("{}{}", self.config.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FxGatewayError::timeout("provider request timed out")
                } else {
                    FxGatewayError::transport(&e.to_string())
                }
            })?;
        Self::decode(response).await
    }
}

#[async_trait]
impl FxGateway for XeHttpGateway {
    async fn request_quote(
        &self,
        source_amount: i64,
        target_currency: &str,
    ) -> Result<FxQuote, FxGatewayError> {
        let request = QuoteRequest {
            source_currency: &self.config.source_currency,
            target_currency,
            source_amount,
        };
        let quote: QuoteResponse = self.post("/v2/quotes", &request).await?;
        tracing::debug!(
            quote_id = %quote.quote_id,
            target_currency = target_currency,
            "received fx quote"
        );
        Ok(FxQuote {
            quote_id: quote.quote_id,
            source_amount,
            target_amount: quote.target_amount,
            rate: quote.rate,
            fee: quote.fee,
            target_currency: target_currency.to_string(),
            expires_at: quote.expires_at,
        })
    }

    async fn confirm_payout(
        &self,
        quote_id: &str,
        recipient_id: &str,
    ) -> Result<PayoutConfirmation, FxGatewayError> {
        let request = PayoutRequest {
            quote_id,
            recipient_id,
        };
        let payout: PayoutResponse = self.post("/v2/payouts", &request).await?;
        Ok(PayoutConfirmation {
            provider_tx_id: payout.transaction_id,
        })
    }

    async fn cancel_payout(&self, quote_id: &str) -> Result<(), FxGatewayError> {
        let path = format!("/v2/quotes/{}/cancel", quote_id);
        let response: CancelResponse = self.post(&path, &serde_json::json!({})).await?;
        tracing::debug!(
            quote_id = quote_id,
            cancelled = response.cancelled,
            "voided fx quote"
        );
        Ok(())
    }

    async fn verify_recipient(
        &self,
        details: &RecipientDetails,
    ) -> Result<String, FxGatewayError> {
        let recipient: RecipientResponse = self.post("/v2/recipients", details).await?;
        Ok(recipient.recipient_id)
    }
}
