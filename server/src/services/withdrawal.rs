//! Withdrawal contract manager
//!
//! Orchestrates the time-boxed quote -> approve/cancel -> settle workflow.
//! Every exit from `pending_approval` is a compare-and-set on the contract
//! row; cancel, expire, the watchdog sweep, and a losing approve all funnel
//! through the same transition, so the hold is released exactly once no
//! matter how many triggers fire.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::db::{with_conn, with_transaction, with_transaction_retry, DbPool};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    ContractStatus, NewTransaction, PaymentMethod, Transaction, TxType, Wallet,
    WithdrawalContract,
};
use crate::services::escrow::Role;
use crate::services::fx_gateway::FxGateway;
use crate::services::notifier::Notifier;

/// Lock-contention retry budget for writes that must land after the
/// provider already acted (settlement, failure resolution).
const SETTLEMENT_WRITE_ATTEMPTS: u32 = 3;

pub struct WithdrawalContractManager {
    pool: Arc<DbPool>,
    gateway: Arc<dyn FxGateway>,
    notifier: Notifier,
}

impl WithdrawalContractManager {
    pub fn new(pool: Arc<DbPool>, gateway: Arc<dyn FxGateway>, notifier: Notifier) -> Self {
        Self {
            pool,
            gateway,
            notifier,
        }
    }

    /// Open a withdrawal attempt: quote, hold, pending contract.
    ///
    /// The quote is requested before the hold so a provider failure leaves
    /// no state behind. Hold and contract insert share one transaction, and
    /// the partial unique index rejects a second pending contract for the
    /// wallet, rolling the hold back with it.
    pub async fn create_contract(
        &self,
        user_id: &str,
        payment_method_id: &str,
        amount: i64,
    ) -> EngineResult<WithdrawalContract> {
        if amount <= 0 {
            return Err(EngineError::InvalidAmount(amount));
        }

        let (wallet, method) = {
            let user_id = user_id.to_string();
            let payment_method_id = payment_method_id.to_string();
            with_conn(&self.pool, move |conn| {
                let wallet = Wallet::find_by_user_id(conn, &user_id)?;
                let method = PaymentMethod::find_by_id(conn, &payment_method_id)?;
                if method.user_id != user_id {
                    return Err(EngineError::Forbidden(
                        "payment method belongs to another user".to_string(),
                    ));
                }
                Ok((wallet, method))
            })
            .await?
        };

        if !method.approved {
            return Err(EngineError::PaymentMethodNotApproved(method.id.clone()));
        }
        if amount > wallet.available() {
            return Err(EngineError::InsufficientFunds {
                available: wallet.available(),
                requested: amount,
            });
        }

        let quote = self
            .gateway
            .request_quote(amount, &method.target_currency)
            .await?;

        let wallet_id = wallet.id.clone();
        let method_id = method.id.clone();
        let contract = with_transaction(&self.pool, move |conn| {
            Wallet::hold(conn, &wallet_id, amount)?;
            WithdrawalContract::create(conn, &wallet_id, &method_id, amount, &quote)
        })
        .await?;

        tracing::info!(
            contract_id = %contract.id,
            wallet_id = %contract.wallet_id,
            amount = amount,
            quote_expires_at = %contract.quote_expires_at,
            "withdrawal contract created"
        );
        Ok(contract)
    }

    /// Approve and settle a pending contract.
    ///
    /// Claims the contract with a CAS `pending_approval -> approved` before
    /// calling the provider, so a concurrent expiry sweep can no longer win.
    /// A provider failure resolves the claim to `failed` and releases the
    /// hold; no path leaves a hold behind without a terminal contract.
    pub async fn approve(
        &self,
        contract_id: &str,
        caller_id: &str,
        role: Role,
    ) -> EngineResult<Transaction> {
        // Phase 1: validate and claim. An expired quote is resolved inside
        // this transaction (exactly as the sweep would) and must COMMIT, so
        // it is returned as an outcome rather than an error.
        let claim = {
            let contract_id = contract_id.to_string();
            let caller_id = caller_id.to_string();
            with_transaction(&self.pool, move |conn| {
                let contract = WithdrawalContract::find_by_id(conn, &contract_id)?;
                let wallet = Wallet::find_by_id(conn, &contract.wallet_id)?;
                if role != Role::Admin && wallet.user_id != caller_id {
                    return Err(EngineError::Forbidden(
                        "contract belongs to another user".to_string(),
                    ));
                }

                let status = contract.status()?;
                if status != ContractStatus::PendingApproval {
                    return Err(status_conflict(&contract, status));
                }

                let now = Utc::now().naive_utc();
                if contract.is_quote_expired(now) {
                    let won = WithdrawalContract::cas_cancel(
                        conn,
                        &contract.id,
                        ContractStatus::Expired,
                        "expired",
                    )? > 0;
                    if won {
                        release_and_log(conn, &contract)?;
                    }
                    return Ok(Claim::QuoteExpired {
                        id: contract.id.clone(),
                        voided_quote: won.then(|| contract.quote_id.clone()),
                    });
                }

                if WithdrawalContract::cas_claim_for_approval(conn, &contract.id)? == 0 {
                    let current = WithdrawalContract::find_by_id(conn, &contract.id)?;
                    let status = current.status()?;
                    return Err(status_conflict(&current, status));
                }

                let method = PaymentMethod::find_by_id(conn, &contract.payment_method_id)?;
                let recipient_id = method.recipient_id.ok_or_else(|| {
                    EngineError::PaymentMethodNotApproved(contract.payment_method_id.clone())
                })?;
                Ok(Claim::Claimed {
                    contract: Box::new(contract),
                    recipient_id,
                    owner: wallet.user_id,
                })
            })
            .await?
        };

        let (contract, recipient_id, owner) = match claim {
            Claim::QuoteExpired { id, voided_quote } => {
                if let Some(quote_id) = voided_quote {
                    self.void_quote(&id, &quote_id).await;
                }
                return Err(EngineError::ExpiredContract(id));
            }
            Claim::Claimed {
                contract,
                recipient_id,
                owner,
            } => (*contract, recipient_id, owner),
        };

        // Phase 2: provider call, outside any DB transaction
        let confirmation = match self
            .gateway
            .confirm_payout(&contract.quote_id, &recipient_id)
            .await
        {
            Ok(confirmation) => confirmation,
            Err(gateway_error) => {
                let contract_clone = contract.clone();
                let err_clone = gateway_error.clone();
                with_transaction_retry(&self.pool, SETTLEMENT_WRITE_ATTEMPTS, move |conn| {
                    WithdrawalContract::mark_failed(conn, &contract_clone.id, &err_clone)?;
                    Wallet::release_hold(
                        conn,
                        &contract_clone.wallet_id,
                        contract_clone.requested_amount,
                    )?;
                    log_unsettled(conn, &contract_clone)
                })
                .await?;
                tracing::warn!(
                    contract_id = %contract.id,
                    code = %gateway_error.code,
                    trace_id = %gateway_error.trace_id,
                    "payout confirmation failed"
                );
                return Err(EngineError::FxGateway(gateway_error));
            }
        };

        // Phase 3: settle. The payout already happened, so this write is
        // retried through transient lock contention rather than abandoned.
        let contract_clone = contract.clone();
        let provider_tx_id = confirmation.provider_tx_id.clone();
        let settle = with_transaction_retry(&self.pool, SETTLEMENT_WRITE_ATTEMPTS, move |conn| {
            WithdrawalContract::mark_settled(conn, &contract_clone.id, &provider_tx_id)?;
            let tx_meta = NewTransaction::with_fee(
                &contract_clone.wallet_id,
                TxType::Withdrawal,
                contract_clone.requested_amount,
                contract_clone.quote_fee,
            )
            .for_contract(&contract_clone.id);
            Wallet::settle_hold(
                conn,
                &contract_clone.wallet_id,
                contract_clone.requested_amount,
            )?;
            Transaction::create(conn, tx_meta)
        })
        .await;
        let tx = match settle {
            Ok(tx) => tx,
            Err(e) => {
                tracing::error!(
                    contract_id = %contract.id,
                    provider_tx_id = %confirmation.provider_tx_id,
                    error = %e,
                    "payout confirmed but the settlement write failed; contract needs manual reconciliation"
                );
                return Err(e);
            }
        };

        tracing::info!(
            contract_id = %contract.id,
            provider_tx_id = %confirmation.provider_tx_id,
            amount = contract.requested_amount,
            "withdrawal settled"
        );
        self.notifier.notify(
            &owner,
            "withdrawal_settled",
            "Withdrawal sent",
            "Your withdrawal has been confirmed and sent to your bank.",
        );
        Ok(tx)
    }

    /// Cancel a pending contract.
    ///
    /// Idempotent across triggers: whichever caller wins the CAS releases
    /// the hold and logs the outcome; everyone else observes the terminal
    /// state and no-ops. Returns the contract's final status.
    pub async fn cancel(&self, contract_id: &str, reason: &str) -> EngineResult<ContractStatus> {
        self.resolve_pending(contract_id, ContractStatus::Cancelled, reason)
            .await
    }

    /// Expire a pending contract past its quote deadline. Same transition
    /// as [`cancel`](Self::cancel) with the terminal status `expired`.
    pub async fn expire(&self, contract_id: &str) -> EngineResult<ContractStatus> {
        self.resolve_pending(contract_id, ContractStatus::Expired, "expired")
            .await
    }

    async fn resolve_pending(
        &self,
        contract_id: &str,
        to: ContractStatus,
        reason: &str,
    ) -> EngineResult<ContractStatus> {
        let contract_id_owned = contract_id.to_string();
        let reason = reason.to_string();

        let (won, final_status, quote_id) = with_transaction(&self.pool, move |conn| {
            let contract = WithdrawalContract::find_by_id(conn, &contract_id_owned)?;
            let status = contract.status()?;

            if status.is_terminal() {
                // Another trigger already resolved it
                return Ok((false, status, None));
            }
            if status == ContractStatus::Approved {
                // Settlement claimed the contract; cancellation lost
                return Err(EngineError::ContractNotPending {
                    id: contract.id.clone(),
                    status: contract.status.clone(),
                });
            }

            if WithdrawalContract::cas_cancel(conn, &contract.id, to, &reason)? == 0 {
                let current = WithdrawalContract::find_by_id(conn, &contract_id_owned)?;
                return Ok((false, current.status()?, None));
            }

            release_and_log(conn, &contract)?;
            Ok((true, to, Some(contract.quote_id)))
        })
        .await?;

        if won {
            tracing::info!(
                contract_id = contract_id,
                status = final_status.as_str(),
                "withdrawal contract resolved"
            );
        }
        if let Some(quote_id) = quote_id {
            self.void_quote(contract_id, &quote_id).await;
        }
        Ok(final_status)
    }

    /// Tell the provider its quote will never be confirmed. Best effort:
    /// the hold is already back, so a provider error is only logged.
    async fn void_quote(&self, contract_id: &str, quote_id: &str) {
        if let Err(e) = self.gateway.cancel_payout(quote_id).await {
            tracing::warn!(
                contract_id = contract_id,
                quote_id = quote_id,
                code = %e.code,
                "provider quote cancellation failed"
            );
        }
    }

    /// Expire every pending contract past its quote deadline. Returns how
    /// many this pass resolved; used by the watchdog sweep.
    pub async fn expire_overdue(&self, batch_size: i64) -> EngineResult<usize> {
        let overdue = {
            let now = Utc::now().naive_utc();
            with_conn(&self.pool, move |conn| {
                WithdrawalContract::find_expired_pending(conn, now, batch_size)
            })
            .await?
        };

        let mut expired = 0;
        for contract in overdue {
            match self.expire(&contract.id).await {
                Ok(ContractStatus::Expired) => expired += 1,
                // Lost the race to another trigger; that is the point
                Ok(_) => {}
                Err(EngineError::ContractNotPending { .. }) => {}
                Err(e) => {
                    tracing::error!(
                        contract_id = %contract.id,
                        error = %e,
                        "failed to expire overdue contract"
                    );
                }
            }
        }
        Ok(expired)
    }

    pub async fn get_contract(&self, contract_id: &str) -> EngineResult<WithdrawalContract> {
        let contract_id = contract_id.to_string();
        with_conn(&self.pool, move |conn| {
            WithdrawalContract::find_by_id(conn, &contract_id)
        })
        .await
    }
}

/// Outcome of the claim transaction in [`WithdrawalContractManager::approve`].
enum Claim {
    Claimed {
        contract: Box<WithdrawalContract>,
        recipient_id: String,
        owner: String,
    },
    /// The quote died unapproved; `voided_quote` is set when this call won
    /// the expiry transition and owes the provider a cancellation.
    QuoteExpired {
        id: String,
        voided_quote: Option<String>,
    },
}

fn status_conflict(contract: &WithdrawalContract, status: ContractStatus) -> EngineError {
    if status == ContractStatus::Expired {
        EngineError::ExpiredContract(contract.id.clone())
    } else {
        EngineError::ContractNotPending {
            id: contract.id.clone(),
            status: contract.status.clone(),
        }
    }
}

/// Winner-side effect of a cancel/expire transition: release the hold and
/// log the unsettled attempt.
fn release_and_log(
    conn: &mut diesel::SqliteConnection,
    contract: &WithdrawalContract,
) -> EngineResult<()> {
    Wallet::release_hold(conn, &contract.wallet_id, contract.requested_amount)?;
    log_unsettled(conn, contract)?;
    Ok(())
}

/// A `failed`-status withdrawal entry recording an attempt that moved no
/// money. Reconciliation ignores non-completed rows.
fn log_unsettled(
    conn: &mut diesel::SqliteConnection,
    contract: &WithdrawalContract,
) -> EngineResult<Transaction> {
    let tx = NewTransaction {
        id: Uuid::new_v4().to_string(),
        wallet_id: contract.wallet_id.clone(),
        escrow_id: None,
        milestone_id: None,
        contract_id: Some(contract.id.clone()),
        tx_type: TxType::Withdrawal.as_str().to_string(),
        amount: contract.requested_amount,
        fee: 0,
        net_amount: contract.requested_amount,
        status: "failed".to_string(),
    };
    Transaction::create(conn, tx)
}
