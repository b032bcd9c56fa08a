//! Offline E2E Test Suite for the settlement engine
//!
//! ## Purpose
//! Deterministic end-to-end coverage of the money paths with zero external
//! dependencies: no network, no FX provider, SQLite on a temp file.
//!
//! ## Test Categories
//! - **Escrow Flow**: funding, milestone release, fees, refund, disputes
//! - **Withdrawal Flow**: quote/hold/approve/settle and the failure paths
//! - **Cancellation Races**: multi-trigger cancel/expire/approve convergence
//! - **Conservation**: ledger-wide balance reconciliation after each flow
//!
//! ## Running Tests
//! ```bash
//! cargo test --package server --test settlement_e2e
//! cargo test --package server --test settlement_e2e cancellation
//! ```

pub mod mock_infrastructure;

pub mod cancellation_race_test;
pub mod conservation_test;
pub mod withdrawal_flow_test;

pub use mock_infrastructure::*;
