//! Payout Engine - Seller Withdrawal Lifecycle Service
//!
//! Admin-operated payout processing: withdrawal requests, balance
//! reservations, Paystack transfers with OTP confirmation, and background
//! reconciliation against gateway truth.
//!
//! # Modules
//!
//! - [`ledger`] - Seller balance ledger (reserve/release/commit)
//! - [`withdrawal`] - Withdrawal lifecycle: state machine, stores, gateway,
//!   engine, reconcile worker, admin API
//! - [`config`] - YAML application configuration
//! - [`logging`] - tracing setup (rolling file + stdout)
//! - [`db`] - PostgreSQL connection pool

pub mod config;
pub mod db;
pub mod ledger;
pub mod logging;
pub mod withdrawal;

// Convenient re-exports at crate root
pub use ledger::{Ledger, LedgerError, MemoryLedger, PgLedger, SellerBalance};
pub use withdrawal::{
    LifecycleEngine, ListFilter, NewWithdrawal, PaymentDetails, PayoutMethod, ReconcileWorker,
    TransferGateway, WithdrawalError, WithdrawalId, WithdrawalRecord, WithdrawalStatus,
    WithdrawalStore, WorkerConfig,
};
