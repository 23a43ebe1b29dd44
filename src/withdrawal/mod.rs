//! Seller Withdrawal Lifecycle
//!
//! Admin-operated payout flow for seller withdrawal requests: a seller files
//! a request, an admin approves or rejects it, approval reserves funds and
//! dispatches a gateway transfer (Paystack), and the request settles to PAID
//! or FAILED either synchronously, via an admin OTP, or through the
//! background reconcile sweep.
//!
//! # State machine
//!
//! ```text
//!               +-> REJECTED (reason required, no balance effect)
//!               |
//!   PENDING ----+-> PROCESSING --+-> PAID     (commit reservation)
//!                    ^           |
//!                    |           +-> AWAITING_PAYSTACK_OTP --+-> PAID
//!                    |           |                           |
//!                    |           +-> FAILED <----------------+
//!                    |               |  (release reservation)
//!                    +---- retry ----+
//! ```
//!
//! PAID and REJECTED are terminal. FAILED is terminal for the gateway but
//! admits a manual admin retry. A PENDING request can additionally be
//! deactivated by the seller (display-only overlay, not a status).
//!
//! # Module layout
//!
//! - [`state`]: status enum and transition predicates
//! - [`types`]: request records, payout methods, audit trail
//! - [`store`] / [`store_pg`] / [`store_memory`]: CAS-based persistence
//! - [`gateway`] / [`paystack`]: transfer gateway seam and Paystack client
//! - [`engine`]: lifecycle orchestration (only balance-mutating component)
//! - [`worker`]: background reconcile sweep
//! - [`api`]: admin HTTP surface

pub mod api;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod paystack;
pub mod state;
pub mod store;
pub mod store_memory;
pub mod store_pg;
pub mod types;
pub mod worker;

#[cfg(test)]
mod integration_tests;

pub use engine::{LifecycleEngine, OtpConfirmation, VerifyOutcome};
pub use error::{GatewayError, WithdrawalError};
pub use gateway::{InitiateOutcome, OtpOutcome, RemoteStatus, TransferGateway};
pub use state::WithdrawalStatus;
pub use store::{ListFilter, WithdrawalStore};
pub use types::{
    AdminContext, AuditAction, AuditEntry, NewWithdrawal, PaymentDetails, PayoutMethod,
    WithdrawalId, WithdrawalRecord,
};
pub use worker::{ReconcileWorker, WorkerConfig};
