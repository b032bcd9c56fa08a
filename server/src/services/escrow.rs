//! Escrow manager
//!
//! Owns the lifecycle of a project's locked budget: funding, per-milestone
//! release with fee booking, excess refund on closure, and the dispute
//! freeze/resolve branch. Each operation runs in one SQLite transaction so
//! the wallet, escrow, and transaction-log writes land together or not at
//! all.

use std::sync::Arc;

use crate::db::{with_conn, with_transaction, DbPool};
use crate::error::{EngineError, EngineResult};
use crate::models::{
    Escrow, EscrowStatus, Milestone, MilestoneState, NewTransaction, Transaction, TxType, Wallet,
};
use crate::services::fees::FeeCalculator;
use crate::services::notifier::Notifier;

/// Caller roles the identity layer hands us. The manager trusts the role
/// but still checks the caller against the escrow parties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Freelancer,
    Admin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "client" => Some(Role::Client),
            "freelancer" => Some(Role::Freelancer),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

pub struct EscrowManager {
    pool: Arc<DbPool>,
    fees: FeeCalculator,
    notifier: Notifier,
    currency: String,
    platform_user: String,
}

/// Outcome of funding: the escrow plus the deposit log entry.
#[derive(Debug)]
pub struct FundedEscrow {
    pub escrow: Escrow,
    pub milestones: Vec<Milestone>,
    pub deposit: Transaction,
}

impl EscrowManager {
    pub fn new(
        pool: Arc<DbPool>,
        fees: FeeCalculator,
        notifier: Notifier,
        currency: String,
        platform_user: String,
    ) -> Self {
        Self {
            pool,
            fees,
            notifier,
            currency,
            platform_user,
        }
    }

    /// Lock a client's budget for an awarded project.
    ///
    /// Debits the full amount from the client wallet, creates the escrow in
    /// `active` with its ordered milestones, and logs the deposit. Milestone
    /// amounts must be positive and sum to the locked total.
    pub async fn fund_escrow(
        &self,
        project_id: &str,
        client_id: &str,
        freelancer_id: &str,
        milestone_amounts: Vec<i64>,
    ) -> EngineResult<FundedEscrow> {
        if milestone_amounts.is_empty() || milestone_amounts.iter().any(|a| *a <= 0) {
            return Err(EngineError::InvalidAmount(
                milestone_amounts.iter().copied().min().unwrap_or(0),
            ));
        }
        let total: i64 = milestone_amounts.iter().sum();

        let project_id = project_id.to_string();
        let client_id = client_id.to_string();
        let freelancer_id = freelancer_id.to_string();
        let currency = self.currency.clone();

        let funded = with_transaction(&self.pool, move |conn| {
            // One escrow per engagement; the unique project index backstops
            // this check under concurrency
            match Escrow::find_by_project(conn, &project_id) {
                Ok(existing) => {
                    return Err(EngineError::InvalidEscrowState {
                        id: existing.id,
                        status: existing.status,
                        required: "no existing escrow for this project".to_string(),
                    })
                }
                Err(EngineError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }

            let client_wallet = Wallet::find_or_create(conn, &client_id, &currency)?;
            Wallet::debit(conn, &client_wallet.id, total)?;

            let escrow = Escrow::create(conn, &project_id, &client_id, &freelancer_id, total)?;
            let milestones = Milestone::create_batch(conn, &escrow.id, &milestone_amounts)?;

            let deposit = Transaction::create(
                conn,
                NewTransaction::completed(&client_wallet.id, TxType::Deposit, total)
                    .for_escrow(&escrow.id),
            )?;

            Ok(FundedEscrow {
                escrow,
                milestones,
                deposit,
            })
        })
        .await?;

        tracing::info!(
            escrow_id = %funded.escrow.id,
            project_id = %funded.escrow.project_id,
            total_amount = total,
            "escrow funded"
        );
        self.notifier.notify(
            &funded.escrow.freelancer_id,
            "escrow_funded",
            "Project funded",
            "The client has locked the project budget in escrow.",
        );
        Ok(funded)
    }

    /// Release one milestone to the freelancer.
    ///
    /// Idempotent under retries: a repeat call for an already-released
    /// milestone returns the original release transaction, anchored by the
    /// unique index on the milestone-release log entry.
    pub async fn release_milestone(
        &self,
        escrow_id: &str,
        milestone_id: &str,
        caller_id: &str,
        role: Role,
    ) -> EngineResult<Transaction> {
        let fees = self.fees;
        let escrow_id = escrow_id.to_string();
        let milestone_id = milestone_id.to_string();
        let caller_id = caller_id.to_string();
        let currency = self.currency.clone();
        let platform_user = self.platform_user.clone();

        let (tx, freelancer_id, completed, newly_released) =
            with_transaction(&self.pool, move |conn| {
                let escrow = Escrow::find_by_id(conn, &escrow_id)?;
                if role != Role::Admin && escrow.client_id != caller_id {
                    return Err(EngineError::Forbidden(
                        "only the escrow client or an admin may do this".to_string(),
                    ));
                }

                let milestone = Milestone::find_by_id(conn, &milestone_id)?;
                if milestone.escrow_id != escrow.id {
                    return Err(EngineError::NotFound(format!(
                        "Milestone {} in escrow {}",
                        milestone_id, escrow_id
                    )));
                }

                // Retried release: hand back the original result
                if let Some(existing) = Transaction::find_milestone_release(conn, &milestone_id)? {
                    return Ok((existing, escrow.freelancer_id, false, false));
                }

                if !escrow.status()?.allows_release() {
                    return Err(EngineError::InvalidEscrowState {
                        id: escrow.id.clone(),
                        status: escrow.status.clone(),
                        required: "active or partially_released".to_string(),
                    });
                }

                let gross = milestone.amount;
                let fee = fees.platform_fee(gross)?;
                let net = fees.net_payout(gross)?;

                Milestone::mark_released(conn, &milestone_id)?;
                let completed = Milestone::all_released(conn, &escrow.id)?;
                let new_status = if completed {
                    EscrowStatus::Completed
                } else {
                    EscrowStatus::PartiallyReleased
                };
                Escrow::apply_release(conn, &escrow.id, gross, fee, new_status)?;

                let freelancer_wallet =
                    Wallet::find_or_create(conn, &escrow.freelancer_id, &currency)?;
                Wallet::credit(conn, &freelancer_wallet.id, net, true)?;
                let release_tx = Transaction::create(
                    conn,
                    NewTransaction::with_fee(&freelancer_wallet.id, TxType::Milestone, gross, fee)
                        .for_escrow(&escrow.id)
                        .for_milestone(&milestone_id),
                )?;

                // Fees accrue to a real ledger account so platform_fee entries
                // reconcile like any other credit. Small milestones can round
                // the fee to zero; nothing is booked then.
                if fee > 0 {
                    let platform_wallet = Wallet::find_or_create(conn, &platform_user, &currency)?;
                    Wallet::credit(conn, &platform_wallet.id, fee, false)?;
                    Transaction::create(
                        conn,
                        NewTransaction::completed(&platform_wallet.id, TxType::PlatformFee, fee)
                            .for_escrow(&escrow.id)
                            .for_milestone(&milestone_id),
                    )?;
                }

                Ok((release_tx, escrow.freelancer_id, completed, true))
            })
            .await?;

        if newly_released {
            tracing::info!(
                escrow_id = %escrow_id_of(&tx),
                milestone_id = milestone_id_of(&tx),
                net_amount = tx.net_amount,
                fee = tx.fee,
                "milestone released"
            );
            self.notifier.notify(
                &freelancer_id,
                "milestone_released",
                "Milestone released",
                "A milestone payment has been credited to your wallet.",
            );
            if completed {
                self.notifier.notify(
                    &freelancer_id,
                    "escrow_completed",
                    "Project complete",
                    "All milestones for this project have been released.",
                );
            }
        }
        Ok(tx)
    }

    /// Record client approval of a milestone deliverable without paying it.
    ///
    /// Approval is an audit marker; both pending and approved milestones
    /// are releasable.
    pub async fn approve_milestone(
        &self,
        escrow_id: &str,
        milestone_id: &str,
        caller_id: &str,
        role: Role,
    ) -> EngineResult<Milestone> {
        let escrow_id = escrow_id.to_string();
        let milestone_id = milestone_id.to_string();
        let caller_id = caller_id.to_string();

        with_transaction(&self.pool, move |conn| {
            let escrow = Escrow::find_by_id(conn, &escrow_id)?;
            if role != Role::Admin && escrow.client_id != caller_id {
                return Err(EngineError::Forbidden(
                    "only the escrow client or an admin may do this".to_string(),
                ));
            }
            let milestone = Milestone::find_by_id(conn, &milestone_id)?;
            if milestone.escrow_id != escrow.id {
                return Err(EngineError::NotFound(format!(
                    "Milestone {} in escrow {}",
                    milestone_id, escrow_id
                )));
            }
            if milestone.state()? == MilestoneState::Released {
                return Err(EngineError::AlreadyReleased { milestone_id });
            }
            Milestone::approve(conn, &milestone_id)?;
            Milestone::find_by_id(conn, &milestone_id)
        })
        .await
    }

    /// Return the unreleased remainder to the client on project closure.
    ///
    /// The escrow ends `completed` when milestones were released and
    /// `refunded` when nothing was. A remainder of zero just finalizes the
    /// status with no refund entry.
    pub async fn refund_excess(&self, escrow_id: &str) -> EngineResult<Option<Transaction>> {
        let fees = self.fees;
        let escrow_id = escrow_id.to_string();
        let currency = self.currency.clone();

        with_transaction(&self.pool, move |conn| {
            let escrow = Escrow::find_by_id(conn, &escrow_id)?;
            if !escrow.status()?.allows_release() {
                return Err(EngineError::InvalidEscrowState {
                    id: escrow.id.clone(),
                    status: escrow.status.clone(),
                    required: "active or partially_released".to_string(),
                });
            }

            let remaining = fees.excess_refund(escrow.total_amount, escrow.released_amount)?;
            let (final_status, tx_type) = if escrow.released_amount > 0 {
                (EscrowStatus::Completed, TxType::EscrowCompletion)
            } else {
                (EscrowStatus::Refunded, TxType::Refund)
            };

            let from = [escrow.status()?];
            if Escrow::cas_status(conn, &escrow.id, &from, final_status)? == 0 {
                return Err(EngineError::ConcurrentModification);
            }

            if remaining == 0 {
                return Ok(None);
            }

            let client_wallet = Wallet::find_or_create(conn, &escrow.client_id, &currency)?;
            Wallet::credit(conn, &client_wallet.id, remaining, false)?;
            let tx = Transaction::create(
                conn,
                NewTransaction::completed(&client_wallet.id, tx_type, remaining)
                    .for_escrow(&escrow.id),
            )?;
            Ok(Some(tx))
        })
        .await
    }

    /// Freeze further releases pending resolution.
    pub async fn mark_disputed(
        &self,
        escrow_id: &str,
        caller_id: &str,
        role: Role,
        reason: &str,
    ) -> EngineResult<Escrow> {
        let escrow_id = escrow_id.to_string();
        let caller_id = caller_id.to_string();
        let reason = reason.to_string();

        let escrow = with_transaction(&self.pool, move |conn| {
            let escrow = Escrow::find_by_id(conn, &escrow_id)?;
            if role != Role::Admin && escrow.client_id != caller_id {
                return Err(EngineError::Forbidden(
                    "only the escrow client or an admin may do this".to_string(),
                ));
            }
            Escrow::mark_disputed(conn, &escrow_id, &reason)?;
            Escrow::find_by_id(conn, &escrow_id)
        })
        .await?;

        tracing::warn!(escrow_id = %escrow.id, "escrow disputed");
        self.notifier.notify(
            &escrow.freelancer_id,
            "escrow_disputed",
            "Escrow disputed",
            "The client has opened a dispute; releases are frozen until it is resolved.",
        );
        Ok(escrow)
    }

    /// Resolve a dispute (admin only).
    ///
    /// `release` unfreezes the escrow so milestone releases resume;
    /// `refund` returns the full remainder to the client and terminates the
    /// escrow as `refunded`.
    pub async fn resolve_dispute(
        &self,
        escrow_id: &str,
        role: Role,
        decision: &str,
    ) -> EngineResult<Escrow> {
        if role != Role::Admin {
            return Err(EngineError::Forbidden(
                "only an admin may resolve disputes".to_string(),
            ));
        }

        let escrow_id = escrow_id.to_string();
        let decision = decision.to_string();
        let currency = self.currency.clone();

        let escrow = with_transaction(&self.pool, move |conn| {
            let escrow = Escrow::find_by_id(conn, &escrow_id)?;
            match decision.as_str() {
                "release" => {
                    // Resume the normal release path; status returns to the
                    // pre-dispute live state
                    let resumed = if escrow.released_amount > 0 {
                        EscrowStatus::PartiallyReleased
                    } else {
                        EscrowStatus::Active
                    };
                    Escrow::resolve_dispute(conn, &escrow_id, "release", resumed)?;
                }
                "refund" => {
                    let remaining = escrow.remaining_amount();
                    Escrow::resolve_dispute(conn, &escrow_id, "refund", EscrowStatus::Refunded)?;
                    if remaining > 0 {
                        let client_wallet =
                            Wallet::find_or_create(conn, &escrow.client_id, &currency)?;
                        Wallet::credit(conn, &client_wallet.id, remaining, false)?;
                        Transaction::create(
                            conn,
                            NewTransaction::completed(&client_wallet.id, TxType::Refund, remaining)
                                .for_escrow(&escrow_id),
                        )?;
                    }
                }
                other => {
                    return Err(EngineError::Internal(anyhow::anyhow!(
                        "unknown dispute resolution {}",
                        other
                    )))
                }
            }
            Escrow::find_by_id(conn, &escrow_id)
        })
        .await?;

        tracing::info!(
            escrow_id = %escrow.id,
            decision = escrow.resolution_decision.as_deref().unwrap_or(""),
            "dispute resolved"
        );
        self.notifier.notify(
            &escrow.client_id,
            "dispute_resolved",
            "Dispute resolved",
            "The dispute on your escrow has been resolved.",
        );
        Ok(escrow)
    }

    /// Escrow snapshot with its milestones.
    pub async fn get_escrow(&self, escrow_id: &str) -> EngineResult<(Escrow, Vec<Milestone>)> {
        let escrow_id = escrow_id.to_string();
        with_conn(&self.pool, move |conn| {
            let escrow = Escrow::find_by_id(conn, &escrow_id)?;
            let milestones = Milestone::find_by_escrow(conn, &escrow_id)?;
            Ok((escrow, milestones))
        })
        .await
    }
}

fn escrow_id_of(tx: &Transaction) -> &str {
    tx.escrow_id.as_deref().unwrap_or("")
}

fn milestone_id_of(tx: &Transaction) -> &str {
    tx.milestone_id.as_deref().unwrap_or("")
}
