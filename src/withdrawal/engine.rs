//! Withdrawal Lifecycle Engine
//!
//! The only component permitted to call the transfer gateway or mutate the
//! seller ledger on behalf of a withdrawal. Orchestrates state transitions,
//! enforces invariants, and serializes per-request transitions through
//! atomic CAS updates in the store.
//!
//! # Safety invariants
//!
//! 1. **CAS-before-reserve**: approve/retry win the status CAS first and only
//!    then reserve funds, so a racing loser never touches the ledger; the
//!    winner reverts the CAS if the reservation is refused. Funds are always
//!    reserved before the gateway is dispatched, and no ledger lock is held
//!    across the network round-trip.
//! 2. **CAS-guarded settlement**: `settle_paid`/`settle_failed` mutate the
//!    ledger only after winning the status CAS, so every path (approve
//!    response, OTP, reconcile, worker) commits or releases at most once.
//!    A won CAS flags the owed commit/release in the store; the flag clears
//!    only after the ledger op lands, and the reconcile sweep retries any
//!    request still carrying it.
//! 3. **Explicit-fail rule**: only an explicit gateway failure (or initiate
//!    transport failure, per the release-on-initiate-failure contract)
//!    releases the reservation; OTP/resend/query transport errors leave the
//!    request unchanged for manual retry.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::ledger::{Ledger, SellerBalance};

use super::error::WithdrawalError;
use super::gateway::{
    InitiateOutcome, OtpOutcome, RemoteStatus, TransferGateway, otp_shape_ok,
};
use super::state::WithdrawalStatus;
use super::store::{ListFilter, WithdrawalStore};
use super::types::{
    AdminContext, AuditAction, AuditEntry, NewWithdrawal, WithdrawalId, WithdrawalRecord,
};

/// How an OTP submission concluded (both are successful terminal transitions)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtpConfirmation {
    /// Gateway accepted the freshly submitted OTP
    Verified,
    /// Transfer had already completed asynchronously; local status synced
    AlreadySettled,
}

impl OtpConfirmation {
    pub fn message(&self) -> &'static str {
        match self {
            OtpConfirmation::Verified => "OTP verified",
            OtpConfirmation::AlreadySettled => "already completed - status synced",
        }
    }
}

/// Result of a reconciliation pass
#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub record: WithdrawalRecord,
    /// Whether reconciliation changed the local status
    pub changed: bool,
}

pub struct LifecycleEngine {
    store: Arc<dyn WithdrawalStore>,
    ledger: Arc<dyn Ledger>,
    gateway: Arc<dyn TransferGateway>,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<dyn WithdrawalStore>,
        ledger: Arc<dyn Ledger>,
        gateway: Arc<dyn TransferGateway>,
    ) -> Self {
        Self {
            store,
            ledger,
            gateway,
        }
    }

    pub fn store(&self) -> &Arc<dyn WithdrawalStore> {
        &self.store
    }

    async fn require(&self, id: WithdrawalId) -> Result<WithdrawalRecord, WithdrawalError> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| WithdrawalError::NotFound(id.to_string()))
    }

    /// Create a new PENDING request (called by the seller-side flow)
    pub async fn create(&self, req: NewWithdrawal) -> Result<WithdrawalRecord, WithdrawalError> {
        if req.amount <= rust_decimal::Decimal::ZERO {
            return Err(WithdrawalError::InvalidAmount);
        }

        let balance = self.ledger.get(req.seller_id).await?;
        if balance.withdrawable() < req.amount {
            return Err(WithdrawalError::InsufficientBalance);
        }

        let record = WithdrawalRecord::new(WithdrawalId::new(), req);
        self.store.create(&record).await?;

        info!(
            request_id = %record.id,
            seller_id = record.seller_id,
            amount = %record.amount,
            method = %record.method,
            "Withdrawal request created"
        );
        Ok(record)
    }

    /// Seller deactivation: PENDING only, request becomes display-only
    pub async fn deactivate(
        &self,
        id: WithdrawalId,
        ctx: &AdminContext,
    ) -> Result<WithdrawalRecord, WithdrawalError> {
        if !self.store.deactivate_if_pending(id).await? {
            let record = self.require(id).await?;
            if !record.is_active {
                return Err(WithdrawalError::RequestDeactivated);
            }
            return Err(WithdrawalError::InvalidState {
                current: record.status,
                expected: WithdrawalStatus::Pending,
            });
        }

        self.store
            .append_audit(id, &AuditEntry::now(AuditAction::Deactivated, ctx, None))
            .await?;
        info!(request_id = %id, "Withdrawal request deactivated by seller");
        self.require(id).await
    }

    /// Approve a pending request: reserve funds, dispatch the gateway
    /// transfer, settle according to the gateway's synchronous answer.
    ///
    /// All-or-nothing: any violated precondition fails before funds move;
    /// losing the PENDING -> PROCESSING race reserves nothing.
    pub async fn approve(
        &self,
        id: WithdrawalId,
        ctx: &AdminContext,
    ) -> Result<WithdrawalRecord, WithdrawalError> {
        let record = self.require(id).await?;

        if !record.is_active {
            return Err(WithdrawalError::RequestDeactivated);
        }
        if record.status != WithdrawalStatus::Pending {
            return Err(WithdrawalError::InvalidState {
                current: record.status,
                expected: WithdrawalStatus::Pending,
            });
        }
        if let Some(other) = self
            .store
            .find_other_exclusive(record.seller_id, id)
            .await?
        {
            warn!(
                request_id = %id,
                conflicting_request = %other,
                "Approve refused: seller already has an in-flight request"
            );
            return Err(WithdrawalError::AnotherActiveRequest);
        }

        // CAS first: the loser of a concurrent approve stops here without
        // ever touching the ledger.
        if !self
            .store
            .update_status_if(id, WithdrawalStatus::Pending, WithdrawalStatus::Processing)
            .await?
        {
            let current = self.require(id).await?;
            return Err(WithdrawalError::InvalidState {
                current: current.status,
                expected: WithdrawalStatus::Pending,
            });
        }

        // Withdrawable balance re-checked at approval time via the reserve
        // guard - the balance may have shifted since creation.
        if let Err(e) = self.ledger.reserve(record.seller_id, record.amount).await {
            // Reservation refused; hand the request back to PENDING.
            self.store
                .update_status_if(id, WithdrawalStatus::Processing, WithdrawalStatus::Pending)
                .await?;
            return Err(e.into());
        }

        self.store
            .append_audit(id, &AuditEntry::now(AuditAction::Approved, ctx, None))
            .await?;
        info!(
            request_id = %id,
            seller_id = record.seller_id,
            amount = %record.amount,
            admin = %ctx.admin_id,
            "Withdrawal approved, funds reserved"
        );

        let record = self.require(id).await?;
        self.dispatch_transfer(&record).await?;
        self.require(id).await
    }

    /// Reject a pending request with a reason. No balance effect.
    pub async fn reject(
        &self,
        id: WithdrawalId,
        reason: &str,
        ctx: &AdminContext,
    ) -> Result<WithdrawalRecord, WithdrawalError> {
        if reason.trim().is_empty() {
            return Err(WithdrawalError::MissingReason);
        }

        let record = self.require(id).await?;
        if !record.is_active {
            return Err(WithdrawalError::RequestDeactivated);
        }

        if !self.store.reject_if_pending(id, reason.trim()).await? {
            let current = self.require(id).await?;
            return Err(WithdrawalError::InvalidState {
                current: current.status,
                expected: WithdrawalStatus::Pending,
            });
        }

        self.store
            .append_audit(
                id,
                &AuditEntry::now(AuditAction::Rejected, ctx, Some(reason.trim().to_string())),
            )
            .await?;
        info!(request_id = %id, admin = %ctx.admin_id, "Withdrawal rejected");
        self.require(id).await
    }

    /// Submit the gateway OTP for a request awaiting confirmation
    pub async fn submit_otp(
        &self,
        id: WithdrawalId,
        otp: &str,
        ctx: &AdminContext,
    ) -> Result<(WithdrawalRecord, OtpConfirmation), WithdrawalError> {
        // Local shape check first - malformed input must not burn
        // gateway-side OTP attempt quotas.
        if !otp_shape_ok(otp) {
            return Err(WithdrawalError::OtpFormat);
        }

        let record = self.require(id).await?;
        if !record.is_active {
            return Err(WithdrawalError::RequestDeactivated);
        }
        if record.status != WithdrawalStatus::AwaitingOtp {
            return Err(WithdrawalError::InvalidState {
                current: record.status,
                expected: WithdrawalStatus::AwaitingOtp,
            });
        }
        let transfer_code = record
            .gateway_transfer_code
            .as_deref()
            .ok_or(WithdrawalError::NoGatewayReference)?;

        let confirmation = match self.gateway.submit_otp(transfer_code, otp).await? {
            OtpOutcome::Verified => OtpConfirmation::Verified,
            OtpOutcome::AlreadyCompleted => {
                // Known race: the gateway finished asynchronously between
                // poll intervals. Treat as success, not as an error.
                info!(request_id = %id, "Transfer already completed on gateway - syncing status");
                OtpConfirmation::AlreadySettled
            }
            OtpOutcome::Rejected(reason) => {
                // No state change; retry permitted.
                warn!(request_id = %id, reason = %reason, "Gateway rejected OTP");
                return Err(WithdrawalError::InvalidOtp(reason));
            }
        };

        self.settle_paid(&record, WithdrawalStatus::AwaitingOtp).await?;
        self.store
            .append_audit(
                id,
                &AuditEntry::now(
                    AuditAction::OtpSubmitted,
                    ctx,
                    Some(confirmation.message().to_string()),
                ),
            )
            .await?;

        Ok((self.require(id).await?, confirmation))
    }

    /// Ask the gateway to resend the OTP
    pub async fn resend_otp(
        &self,
        id: WithdrawalId,
        ctx: &AdminContext,
    ) -> Result<(), WithdrawalError> {
        let record = self.require(id).await?;
        if !record.is_active {
            return Err(WithdrawalError::RequestDeactivated);
        }
        if record.status != WithdrawalStatus::AwaitingOtp {
            return Err(WithdrawalError::InvalidState {
                current: record.status,
                expected: WithdrawalStatus::AwaitingOtp,
            });
        }
        let transfer_code = record
            .gateway_transfer_code
            .as_deref()
            .ok_or(WithdrawalError::NoGatewayReference)?;

        self.gateway.resend_otp(transfer_code).await?;
        self.store
            .append_audit(id, &AuditEntry::now(AuditAction::OtpResent, ctx, None))
            .await?;
        info!(request_id = %id, "OTP resend requested");
        Ok(())
    }

    /// On-demand reconciliation: query the gateway for authoritative status
    /// and transactionally update local status/balances to match.
    ///
    /// Idempotent - when local and remote already agree this is a no-op, and
    /// the CAS-guarded settle helpers mutate the ledger at most once total.
    pub async fn verify(
        &self,
        id: WithdrawalId,
        ctx: Option<&AdminContext>,
    ) -> Result<VerifyOutcome, WithdrawalError> {
        let record = self.require(id).await?;
        // Admin-triggered verify on a deactivated request is refused; the
        // background sweep never sees one (deactivation is PENDING-only and
        // PENDING has no transfer code).
        if ctx.is_some() && !record.is_active {
            return Err(WithdrawalError::RequestDeactivated);
        }
        let transfer_code = record
            .gateway_transfer_code
            .as_deref()
            .ok_or(WithdrawalError::NoGatewayReference)?;

        let remote = self.gateway.query_status(transfer_code).await?;
        let changed = self.apply_remote_status(&record, &remote).await?;

        if let Some(ctx) = ctx {
            let note = format!(
                "gateway status: {:?}{}",
                remote,
                if changed { " (local status corrected)" } else { "" }
            );
            self.store
                .append_audit(id, &AuditEntry::now(AuditAction::Verified, ctx, Some(note)))
                .await?;
        }

        Ok(VerifyOutcome {
            record: self.require(id).await?,
            changed,
        })
    }

    /// Manual retry of a FAILED request: re-reserve and re-dispatch with a
    /// fresh idempotency reference (the attempt bump changes it).
    pub async fn retry_failed(
        &self,
        id: WithdrawalId,
        ctx: &AdminContext,
    ) -> Result<WithdrawalRecord, WithdrawalError> {
        let record = self.require(id).await?;
        if !record.is_active {
            return Err(WithdrawalError::RequestDeactivated);
        }
        if record.status != WithdrawalStatus::Failed {
            return Err(WithdrawalError::InvalidState {
                current: record.status,
                expected: WithdrawalStatus::Failed,
            });
        }
        if self
            .store
            .find_other_exclusive(record.seller_id, id)
            .await?
            .is_some()
        {
            return Err(WithdrawalError::AnotherActiveRequest);
        }

        // CAS first (with the attempt bump); a racing second retry loses the
        // CAS and never reserves.
        if !self
            .store
            .update_status_bump_attempt_if(id, WithdrawalStatus::Failed, WithdrawalStatus::Processing)
            .await?
        {
            let current = self.require(id).await?;
            return Err(WithdrawalError::InvalidState {
                current: current.status,
                expected: WithdrawalStatus::Failed,
            });
        }

        if let Err(e) = self.ledger.reserve(record.seller_id, record.amount).await {
            // Plain CAS back to FAILED: there is no reservation to release,
            // so this revert must not flag an owed ledger op.
            self.store
                .update_status_if(id, WithdrawalStatus::Processing, WithdrawalStatus::Failed)
                .await?;
            return Err(e.into());
        }

        self.store
            .append_audit(id, &AuditEntry::now(AuditAction::Retried, ctx, None))
            .await?;
        info!(request_id = %id, admin = %ctx.admin_id, "Failed withdrawal re-approved for retry");

        let record = self.require(id).await?;
        self.dispatch_transfer(&record).await?;
        self.require(id).await
    }

    /// Fetch one request plus the current seller balance snapshot
    pub async fn get_with_balance(
        &self,
        id: WithdrawalId,
    ) -> Result<(WithdrawalRecord, SellerBalance), WithdrawalError> {
        let record = self.require(id).await?;
        let balance = self.ledger.get(record.seller_id).await?;
        Ok((record, balance))
    }

    /// List requests with filters; returns (page, total matching count)
    pub async fn list(
        &self,
        filter: &ListFilter,
    ) -> Result<(Vec<WithdrawalRecord>, i64), WithdrawalError> {
        let records = self.store.list(filter).await?;
        let total = self.store.count(filter).await?;
        Ok((records, total))
    }

    // ========================================================================
    // Gateway leg + settlement (single balance-mutation code path)
    // ========================================================================

    /// Dispatch the gateway transfer for a freshly PROCESSING record and
    /// settle according to the synchronous outcome. Shared by approve and
    /// retry. No ledger lock is held across the gateway round-trip.
    async fn dispatch_transfer(
        &self,
        record: &WithdrawalRecord,
    ) -> Result<(), WithdrawalError> {
        // Cash has no gateway leg: the admin hands over cash, so approval
        // settles immediately.
        if !record.method.uses_gateway() {
            self.settle_paid(record, WithdrawalStatus::Processing).await?;
            return Ok(());
        }

        let reference = record.idempotency_reference();
        let outcome = self
            .gateway
            .initiate_transfer(&record.details, record.amount, &reference)
            .await;

        match outcome {
            Ok(InitiateOutcome::Completed {
                reference,
                transfer_code,
            }) => {
                if self
                    .store
                    .update_status_with_refs(
                        record.id,
                        WithdrawalStatus::Processing,
                        WithdrawalStatus::Paid,
                        &reference,
                        &transfer_code,
                    )
                    .await?
                {
                    info!(request_id = %record.id, "Gateway settled synchronously");
                    self.finish_paid_settlement(record.seller_id, record.amount, record.id)
                        .await;
                }
                Ok(())
            }
            Ok(InitiateOutcome::NeedsOtp {
                reference,
                transfer_code,
            }) => {
                self.store
                    .update_status_with_refs(
                        record.id,
                        WithdrawalStatus::Processing,
                        WithdrawalStatus::AwaitingOtp,
                        &reference,
                        &transfer_code,
                    )
                    .await?;
                info!(request_id = %record.id, "Gateway requires OTP confirmation");
                Ok(())
            }
            Ok(InitiateOutcome::Pending {
                reference,
                transfer_code,
            }) => {
                // Stays PROCESSING; the reconcile sweep picks it up.
                self.store
                    .update_status_with_refs(
                        record.id,
                        WithdrawalStatus::Processing,
                        WithdrawalStatus::Processing,
                        &reference,
                        &transfer_code,
                    )
                    .await?;
                info!(request_id = %record.id, "Gateway settling asynchronously");
                Ok(())
            }
            Err(e) => {
                // Initiate failure releases the reservation - no stuck
                // locked funds.
                warn!(request_id = %record.id, error = %e, "Gateway transfer initiation failed");
                self.settle_failed(record, WithdrawalStatus::Processing, &e.to_string())
                    .await?;
                Ok(())
            }
        }
    }

    /// Map the gateway's authoritative status onto the local record.
    /// Returns whether the local status changed.
    async fn apply_remote_status(
        &self,
        record: &WithdrawalRecord,
        remote: &RemoteStatus,
    ) -> Result<bool, WithdrawalError> {
        match remote {
            RemoteStatus::Success => match record.status {
                WithdrawalStatus::Paid => Ok(false),
                WithdrawalStatus::Processing | WithdrawalStatus::AwaitingOtp => {
                    self.settle_paid(record, record.status).await
                }
                current => {
                    // Local terminal state disagrees with gateway truth.
                    error!(
                        request_id = %record.id,
                        local_status = %current,
                        "RECONCILIATION DIVERGENCE: gateway reports success for a request in a terminal local status"
                    );
                    self.settle_paid(record, current).await
                }
            },
            RemoteStatus::Failed(reason) => match record.status {
                WithdrawalStatus::Failed => Ok(false),
                WithdrawalStatus::Processing | WithdrawalStatus::AwaitingOtp => {
                    self.settle_failed(record, record.status, reason).await
                }
                current => {
                    // Never silently claw back a paid-out request; flag for ops.
                    error!(
                        request_id = %record.id,
                        local_status = %current,
                        reason = %reason,
                        "RECONCILIATION DIVERGENCE: gateway reports failure for a request in a terminal local status"
                    );
                    Ok(false)
                }
            },
            RemoteStatus::OtpRequired => {
                if record.status == WithdrawalStatus::Processing {
                    Ok(self
                        .store
                        .update_status_if(
                            record.id,
                            WithdrawalStatus::Processing,
                            WithdrawalStatus::AwaitingOtp,
                        )
                        .await?)
                } else {
                    Ok(false)
                }
            }
            RemoteStatus::Pending => Ok(false),
        }
    }

    /// CAS `from` -> PAID, then commit the reservation. The ledger mutates
    /// only when this caller won the CAS, so a double commit is impossible.
    async fn settle_paid(
        &self,
        record: &WithdrawalRecord,
        from: WithdrawalStatus,
    ) -> Result<bool, WithdrawalError> {
        if !self
            .store
            .update_status_if(record.id, from, WithdrawalStatus::Paid)
            .await?
        {
            return Ok(false);
        }
        self.finish_paid_settlement(record.seller_id, record.amount, record.id)
            .await;
        Ok(true)
    }

    /// CAS `from` -> FAILED, then release the reservation
    async fn settle_failed(
        &self,
        record: &WithdrawalRecord,
        from: WithdrawalStatus,
        reason: &str,
    ) -> Result<bool, WithdrawalError> {
        if !self
            .store
            .update_status_with_error(record.id, from, WithdrawalStatus::Failed, reason)
            .await?
        {
            return Ok(false);
        }
        self.finish_failed_settlement(record.seller_id, record.amount, record.id)
            .await;
        warn!(request_id = %record.id, reason = %reason, "Payout failed");
        Ok(true)
    }

    /// Apply the ledger commit a won PAID transition owes, then clear the
    /// owed-settlement flag. On failure the flag stays set and the reconcile
    /// sweep retries.
    async fn finish_paid_settlement(
        &self,
        seller_id: i64,
        amount: rust_decimal::Decimal,
        id: WithdrawalId,
    ) {
        if let Err(e) = self.ledger.commit(seller_id, amount).await {
            error!(
                request_id = %id,
                seller_id,
                error = %e,
                "Ledger commit failed after PAID transition; sweep will retry"
            );
            return;
        }
        self.mark_settled_logged(id).await;
        info!(request_id = %id, seller_id, amount = %amount, "🔒 Payout committed");
    }

    /// Release counterpart of `finish_paid_settlement` for FAILED transitions
    async fn finish_failed_settlement(
        &self,
        seller_id: i64,
        amount: rust_decimal::Decimal,
        id: WithdrawalId,
    ) {
        if let Err(e) = self.ledger.release(seller_id, amount).await {
            error!(
                request_id = %id,
                seller_id,
                error = %e,
                "Ledger release failed after FAILED transition; sweep will retry"
            );
            return;
        }
        self.mark_settled_logged(id).await;
        info!(request_id = %id, seller_id, amount = %amount, "Reservation released");
    }

    async fn mark_settled_logged(&self, id: WithdrawalId) {
        if let Err(e) = self.store.mark_ledger_settled(id).await {
            // The ledger op landed but the flag didn't clear; the sweep will
            // re-drive commit/release, whose floor guards keep it safe.
            error!(request_id = %id, error = %e, "Failed to clear owed-settlement flag");
        }
    }

    /// Re-drive the ledger commit/release a PAID/FAILED request still owes.
    /// Called by the reconcile sweep for records flagged unsettled.
    /// Returns whether a ledger op was applied.
    pub async fn retry_ledger_settlement(
        &self,
        id: WithdrawalId,
    ) -> Result<bool, WithdrawalError> {
        let record = self.require(id).await?;
        if record.ledger_settled {
            return Ok(false);
        }

        match record.status {
            WithdrawalStatus::Paid => {
                self.ledger.commit(record.seller_id, record.amount).await?;
            }
            WithdrawalStatus::Failed => {
                self.ledger.release(record.seller_id, record.amount).await?;
            }
            current => {
                // Only PAID/FAILED transitions flag an owed ledger op.
                error!(
                    request_id = %id,
                    status = %current,
                    "Unsettled flag on a request outside PAID/FAILED"
                );
                return Ok(false);
            }
        }

        self.store.mark_ledger_settled(id).await?;
        info!(request_id = %id, status = %record.status, "Owed ledger settlement applied");
        Ok(true)
    }
}
