//! Withdrawal Request Store
//!
//! Persistence seam for withdrawal requests. All status updates are atomic
//! CAS (Compare-And-Swap) operations: the UPDATE only applies when the
//! current status matches the expected one, and the boolean result tells the
//! caller whether it won the transition. Records are never deleted;
//! rejected/paid/failed requests remain as immutable audit records.

use std::time::Duration;

use async_trait::async_trait;

use super::error::WithdrawalError;
use super::state::WithdrawalStatus;
use super::types::{AuditEntry, WithdrawalId, WithdrawalRecord};

/// Filters for listing withdrawal requests
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub seller_id: Option<i64>,
    pub status: Option<WithdrawalStatus>,
    pub is_active: Option<bool>,
    pub limit: i64,
    pub offset: i64,
}

impl ListFilter {
    pub fn with_limits(mut self, limit: i64, offset: i64) -> Self {
        self.limit = limit.clamp(1, 100);
        self.offset = offset.max(0);
        self
    }
}

/// Withdrawal request persistence operations
#[async_trait]
pub trait WithdrawalStore: Send + Sync {
    /// Insert a new PENDING record.
    ///
    /// Fails with `AnotherActiveRequest` if the seller already has a request
    /// in a non-terminal status (backed by a partial unique index in
    /// Postgres, by the store lock in memory).
    async fn create(&self, record: &WithdrawalRecord) -> Result<(), WithdrawalError>;

    async fn get(&self, id: WithdrawalId) -> Result<Option<WithdrawalRecord>, WithdrawalError>;

    async fn list(&self, filter: &ListFilter) -> Result<Vec<WithdrawalRecord>, WithdrawalError>;

    async fn count(&self, filter: &ListFilter) -> Result<i64, WithdrawalError>;

    /// Atomic CAS: move `id` from `expected` to `new` status.
    /// Sets `processed_at` and flags the owed ledger commit when `new` is
    /// PAID. Returns false if the current status didn't match (another actor
    /// got there first). Fails with `AnotherActiveRequest` when the move
    /// into an exclusive status would give the seller a second in-flight
    /// request (partial unique index in Postgres, in-lock check in memory).
    async fn update_status_if(
        &self,
        id: WithdrawalId,
        expected: WithdrawalStatus,
        new: WithdrawalStatus,
    ) -> Result<bool, WithdrawalError>;

    /// CAS with an error message attached (failed path); flags the owed
    /// ledger release when `new` is FAILED
    async fn update_status_with_error(
        &self,
        id: WithdrawalId,
        expected: WithdrawalStatus,
        new: WithdrawalStatus,
        error: &str,
    ) -> Result<bool, WithdrawalError>;

    /// CAS recording gateway correlation identifiers alongside the move
    async fn update_status_with_refs(
        &self,
        id: WithdrawalId,
        expected: WithdrawalStatus,
        new: WithdrawalStatus,
        reference: &str,
        transfer_code: &str,
    ) -> Result<bool, WithdrawalError>;

    /// CAS bumping the approval attempt counter (manual retry path); the
    /// bump changes the gateway idempotency reference. Subject to the same
    /// exclusivity guard as `update_status_if`.
    async fn update_status_bump_attempt_if(
        &self,
        id: WithdrawalId,
        expected: WithdrawalStatus,
        new: WithdrawalStatus,
    ) -> Result<bool, WithdrawalError>;

    /// CAS PENDING -> REJECTED recording the reason
    async fn reject_if_pending(
        &self,
        id: WithdrawalId,
        reason: &str,
    ) -> Result<bool, WithdrawalError>;

    /// Seller deactivation overlay; only legal while PENDING.
    /// Returns false if the request is not pending-and-active.
    async fn deactivate_if_pending(&self, id: WithdrawalId) -> Result<bool, WithdrawalError>;

    /// Append one audit block (append-only; prior blocks are never touched)
    async fn append_audit(
        &self,
        id: WithdrawalId,
        entry: &AuditEntry,
    ) -> Result<(), WithdrawalError>;

    /// Another request for this seller in a non-terminal status, excluding
    /// `excluding` - the one-active-request-per-seller invariant probe
    async fn find_other_exclusive(
        &self,
        seller_id: i64,
        excluding: WithdrawalId,
    ) -> Result<Option<WithdrawalId>, WithdrawalError>;

    /// Non-terminal requests holding a gateway transfer code whose last
    /// update is older than `threshold` - input for the reconcile sweep
    async fn find_stale(
        &self,
        threshold: Duration,
        limit: i64,
    ) -> Result<Vec<WithdrawalRecord>, WithdrawalError>;

    /// Mark the owed ledger commit/release for a settled request as applied
    async fn mark_ledger_settled(&self, id: WithdrawalId) -> Result<(), WithdrawalError>;

    /// PAID/FAILED requests whose ledger commit/release has not landed yet -
    /// input for the sweep's settlement retry
    async fn find_unsettled(
        &self,
        limit: i64,
    ) -> Result<Vec<WithdrawalRecord>, WithdrawalError>;
}
