//! Seller Balance Ledger
//!
//! The `SellerBalance` row is the principal shared mutable resource of the
//! payout engine. The three mutators (`reserve`, `release`, `commit`) are the
//! ONLY write path to it; each is a single atomic operation with a guarded
//! floor check, so two concurrent requests against the same seller cannot
//! both pass a withdrawable-balance check and then both mutate.
//!
//! # Balance fields
//!
//! - `balance`: cumulative net revenue ever earned
//! - `locked_balance`: funds reserved against in-flight withdrawals
//! - `pending_balance`: recent sales not yet withdrawable (read-only input here)
//! - withdrawable: **derived** `balance - locked - pending`, never negative

pub mod memory;
pub mod pg;

pub use memory::MemoryLedger;
pub use pg::PgLedger;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Snapshot of a seller's balance figures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SellerBalance {
    pub seller_id: i64,
    pub balance: Decimal,
    pub locked_balance: Decimal,
    pub pending_balance: Decimal,
}

impl SellerBalance {
    /// Funds the seller may currently request for payout (derived, not stored)
    pub fn withdrawable(&self) -> Decimal {
        self.balance - self.locked_balance - self.pending_balance
    }
}

/// Ledger error types
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Amount exceeds withdrawable balance")]
    InsufficientWithdrawable,

    #[error("Locked balance is below the requested release/commit amount")]
    ReservationUnderflow,

    #[error("Seller balance not found: {0}")]
    SellerNotFound(i64),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        LedgerError::Database(e.to_string())
    }
}

/// Atomic balance mutators - the only write path to `SellerBalance`
///
/// Every method is all-or-nothing: a failed guard leaves the row untouched.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Read the current balance figures
    async fn get(&self, seller_id: i64) -> Result<SellerBalance, LedgerError>;

    /// Reserve funds against an in-flight withdrawal:
    /// `locked_balance += amount`, guarded by `withdrawable >= amount`
    async fn reserve(&self, seller_id: i64, amount: Decimal) -> Result<(), LedgerError>;

    /// Release a reservation without touching `balance` (failed/rejected path):
    /// `locked_balance -= amount`, guarded by `locked_balance >= amount`
    async fn release(&self, seller_id: i64, amount: Decimal) -> Result<(), LedgerError>;

    /// Finalize a payout (successful path):
    /// `balance -= amount; locked_balance -= amount`, same guard as release
    async fn commit(&self, seller_id: i64, amount: Decimal) -> Result<(), LedgerError>;
}
