//! Persistence models for the settlement ledger
//!
//! Every balance mutation in this module is a guarded UPDATE: the WHERE
//! clause restates the invariant being relied on, and a zero row count means
//! another writer got there first. Services treat that as a typed error, not
//! a retry-in-place.

pub mod escrow;
pub mod idempotency;
pub mod milestone;
pub mod notification;
pub mod payment_method;
pub mod transaction;
pub mod wallet;
pub mod withdrawal_contract;

pub use escrow::{Escrow, EscrowStatus, NewEscrow};
pub use idempotency::IdempotencyRecord;
pub use milestone::{Milestone, MilestoneState, NewMilestone};
pub use notification::{NewNotification, Notification};
pub use payment_method::{NewPaymentMethod, PaymentMethod};
pub use transaction::{NewTransaction, Transaction, TxType};
pub use wallet::{NewWallet, Wallet};
pub use withdrawal_contract::{ContractStatus, NewWithdrawalContract, WithdrawalContract};
