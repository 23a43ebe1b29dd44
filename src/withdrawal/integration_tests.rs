//! Lifecycle integration tests over the in-memory store/ledger and the
//! scriptable mock gateway. Exercises the full engine paths an operator
//! actually drives: approve, reject, OTP, retry, reconcile.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::ledger::{Ledger, LedgerError, MemoryLedger, SellerBalance};

use super::engine::{LifecycleEngine, OtpConfirmation};
use super::error::{GatewayError, WithdrawalError};
use super::gateway::mock::{MockGateway, ScriptedInitiate};
use super::gateway::{OtpOutcome, RemoteStatus};
use super::state::WithdrawalStatus;
use super::store::{ListFilter, WithdrawalStore};
use super::store_memory::MemoryStore;
use super::types::{
    AdminContext, NewWithdrawal, PaymentDetails, PayoutMethod, WithdrawalRecord,
};

struct Harness {
    engine: LifecycleEngine,
    ledger: Arc<MemoryLedger>,
    gateway: Arc<MockGateway>,
    store: Arc<MemoryStore>,
}

fn dec(v: i64) -> Decimal {
    Decimal::from(v)
}

fn admin() -> AdminContext {
    AdminContext::new("admin-1", "admin")
}

async fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let gateway = Arc::new(MockGateway::new());
    ledger.seed(1001, dec(1000), dec(0), dec(0)).await;

    let engine = LifecycleEngine::new(
        Arc::clone(&store) as Arc<dyn WithdrawalStore>,
        Arc::clone(&ledger) as Arc<dyn Ledger>,
        Arc::clone(&gateway) as Arc<dyn super::gateway::TransferGateway>,
    );
    Harness {
        engine,
        ledger,
        gateway,
        store,
    }
}

fn momo_request(amount: i64) -> NewWithdrawal {
    NewWithdrawal {
        seller_id: 1001,
        amount: dec(amount),
        method: PayoutMethod::MtnMomo,
        details: PaymentDetails::MobileMoney {
            provider: "MTN".to_string(),
            phone: "0244000000".to_string(),
        },
    }
}

async fn create(h: &Harness, amount: i64) -> WithdrawalRecord {
    h.engine.create(momo_request(amount)).await.unwrap()
}

// ============================================================================
// Creation
// ============================================================================

#[tokio::test]
async fn test_create_requires_positive_amount_and_funds() {
    let h = harness().await;

    assert!(matches!(
        h.engine.create(momo_request(0)).await,
        Err(WithdrawalError::InvalidAmount)
    ));
    assert!(matches!(
        h.engine.create(momo_request(1001)).await,
        Err(WithdrawalError::InsufficientBalance)
    ));

    let record = create(&h, 300).await;
    assert_eq!(record.status, WithdrawalStatus::Pending);
    assert!(record.is_active);
}

#[tokio::test]
async fn test_one_active_request_per_seller() {
    let h = harness().await;

    create(&h, 100).await;
    assert!(matches!(
        h.engine.create(momo_request(100)).await,
        Err(WithdrawalError::AnotherActiveRequest)
    ));
}

// ============================================================================
// Approve: synchronous settle, OTP branch, decline, race
// ============================================================================

#[tokio::test]
async fn test_approve_synchronous_success_commits() {
    let h = harness().await;
    let record = create(&h, 300).await;

    h.gateway.script_initiate(ScriptedInitiate::Complete);
    let after = h.engine.approve(record.id, &admin()).await.unwrap();

    assert_eq!(after.status, WithdrawalStatus::Paid);
    assert!(after.processed_at.is_some());
    assert!(after.gateway_transfer_code.is_some());

    // Reservation committed: balance down, nothing left locked.
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(700));
    assert_eq!(b.locked_balance, dec(0));
}

#[tokio::test]
async fn test_approve_needs_otp_holds_reservation() {
    let h = harness().await;
    let record = create(&h, 300).await;

    h.gateway.script_initiate(ScriptedInitiate::NeedOtp);
    let after = h.engine.approve(record.id, &admin()).await.unwrap();

    assert_eq!(after.status, WithdrawalStatus::AwaitingOtp);

    // Funds stay reserved while waiting for the OTP.
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(1000));
    assert_eq!(b.locked_balance, dec(300));
    assert_eq!(b.withdrawable(), dec(700));
}

#[tokio::test]
async fn test_approve_gateway_decline_fails_and_releases() {
    let h = harness().await;
    let record = create(&h, 300).await;

    h.gateway
        .script_initiate(ScriptedInitiate::Decline("no gateway balance".to_string()));
    let after = h.engine.approve(record.id, &admin()).await.unwrap();

    assert_eq!(after.status, WithdrawalStatus::Failed);
    assert!(after.error.as_deref().unwrap().contains("no gateway balance"));

    // Reservation fully released.
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(1000));
    assert_eq!(b.locked_balance, dec(0));
}

#[tokio::test]
async fn test_approve_timeout_fails_without_stuck_funds() {
    let h = harness().await;
    let record = create(&h, 300).await;

    h.gateway.script_initiate(ScriptedInitiate::TimeOut);
    let after = h.engine.approve(record.id, &admin()).await.unwrap();

    assert_eq!(after.status, WithdrawalStatus::Failed);
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.locked_balance, dec(0));
    assert_eq!(b.withdrawable(), dec(1000));
}

#[tokio::test]
async fn test_double_approve_second_loses() {
    let h = harness().await;
    let record = create(&h, 300).await;

    h.gateway.script_initiate(ScriptedInitiate::Complete);
    h.engine.approve(record.id, &admin()).await.unwrap();

    // Second approval sees a non-pending request.
    let err = h.engine.approve(record.id, &admin()).await.unwrap_err();
    assert!(matches!(err, WithdrawalError::InvalidState { .. }));

    // Exactly one gateway call, exactly one commit.
    assert_eq!(h.gateway.initiate_count(), 1);
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(700));
    assert_eq!(b.locked_balance, dec(0));
}

#[tokio::test]
async fn test_concurrent_approves_exactly_one_wins() {
    let h = harness().await;
    let record = create(&h, 300).await;
    h.gateway.script_initiate(ScriptedInitiate::Complete);

    let engine = Arc::new(h.engine);
    let (a, b) = tokio::join!(
        {
            let engine = Arc::clone(&engine);
            async move { engine.approve(record.id, &admin()).await }
        },
        {
            let engine = Arc::clone(&engine);
            async move { engine.approve(record.id, &AdminContext::new("admin-2", "admin")).await }
        },
    );

    // Exactly one approval wins the PENDING -> PROCESSING CAS; the loser's
    // reservation (if any) is given back.
    assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
    for result in [&a, &b] {
        if let Err(e) = result {
            assert!(matches!(e, WithdrawalError::InvalidState { .. }));
        }
    }

    assert_eq!(h.gateway.initiate_count(), 1);
    let bal = h.ledger.get(1001).await.unwrap();
    assert_eq!(bal.balance, dec(700));
    assert_eq!(bal.locked_balance, dec(0));
}

#[tokio::test]
async fn test_approve_insufficient_withdrawable_mutates_nothing() {
    let h = harness().await;
    let record = create(&h, 300).await;

    // Withdrawable collapses to 150 after creation.
    h.ledger.seed(1001, dec(1000), dec(0), dec(850)).await;

    let err = h.engine.approve(record.id, &admin()).await.unwrap_err();
    assert!(matches!(err, WithdrawalError::InsufficientBalance));

    let after = h.store.get(record.id).await.unwrap().unwrap();
    assert_eq!(after.status, WithdrawalStatus::Pending);
    assert_eq!(h.gateway.initiate_count(), 0);
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.locked_balance, dec(0));
}

#[tokio::test]
async fn test_cash_payout_settles_on_approval_without_gateway() {
    let h = harness().await;
    let record = h
        .engine
        .create(NewWithdrawal {
            seller_id: 1001,
            amount: dec(200),
            method: PayoutMethod::Cash,
            details: PaymentDetails::Cash,
        })
        .await
        .unwrap();

    let after = h.engine.approve(record.id, &admin()).await.unwrap();

    assert_eq!(after.status, WithdrawalStatus::Paid);
    assert_eq!(h.gateway.initiate_count(), 0);
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(800));
}

// ============================================================================
// Reject / deactivate
// ============================================================================

#[tokio::test]
async fn test_reject_requires_reason_and_pending() {
    let h = harness().await;
    let record = create(&h, 300).await;

    assert!(matches!(
        h.engine.reject(record.id, "   ", &admin()).await,
        Err(WithdrawalError::MissingReason)
    ));

    let after = h
        .engine
        .reject(record.id, "suspicious account", &admin())
        .await
        .unwrap();
    assert_eq!(after.status, WithdrawalStatus::Rejected);
    assert_eq!(after.rejection_reason.as_deref(), Some("suspicious account"));

    // Terminal: a second reject is an invalid transition.
    assert!(matches!(
        h.engine.reject(record.id, "again", &admin()).await,
        Err(WithdrawalError::InvalidState { .. })
    ));

    // Reject never touches the ledger.
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(1000));
    assert_eq!(b.locked_balance, dec(0));
}

#[tokio::test]
async fn test_deactivated_request_refuses_admin_actions() {
    let h = harness().await;
    let record = create(&h, 300).await;

    let after = h.engine.deactivate(record.id, &admin()).await.unwrap();
    assert!(!after.is_active);
    assert_eq!(after.status, WithdrawalStatus::Pending);

    assert!(matches!(
        h.engine.approve(record.id, &admin()).await,
        Err(WithdrawalError::RequestDeactivated)
    ));
    assert!(matches!(
        h.engine.reject(record.id, "reason", &admin()).await,
        Err(WithdrawalError::RequestDeactivated)
    ));

    // Deactivation frees the exclusivity slot.
    let next = h.engine.create(momo_request(100)).await.unwrap();
    assert_eq!(next.status, WithdrawalStatus::Pending);
}

#[tokio::test]
async fn test_deactivate_only_while_pending() {
    let h = harness().await;
    let record = create(&h, 300).await;

    h.gateway.script_initiate(ScriptedInitiate::NeedOtp);
    h.engine.approve(record.id, &admin()).await.unwrap();

    assert!(matches!(
        h.engine.deactivate(record.id, &admin()).await,
        Err(WithdrawalError::InvalidState { .. })
    ));
}

// ============================================================================
// OTP flow
// ============================================================================

async fn approved_awaiting_otp(h: &Harness) -> WithdrawalRecord {
    let record = create(h, 300).await;
    h.gateway.script_initiate(ScriptedInitiate::NeedOtp);
    h.engine.approve(record.id, &admin()).await.unwrap()
}

#[tokio::test]
async fn test_otp_shape_rejected_before_gateway_call() {
    let h = harness().await;
    let record = approved_awaiting_otp(&h).await;

    for bad in ["123", "12a456", "", "12 34"] {
        assert!(matches!(
            h.engine.submit_otp(record.id, bad, &admin()).await,
            Err(WithdrawalError::OtpFormat)
        ));
    }
    // Not a single gateway-side attempt burned.
    assert_eq!(h.gateway.otp_count(), 0);
}

#[tokio::test]
async fn test_otp_verified_settles_paid() {
    let h = harness().await;
    let record = approved_awaiting_otp(&h).await;

    h.gateway.script_otp(Ok(OtpOutcome::Verified));
    let (after, confirmation) = h
        .engine
        .submit_otp(record.id, "123456", &admin())
        .await
        .unwrap();

    assert_eq!(confirmation, OtpConfirmation::Verified);
    assert_eq!(after.status, WithdrawalStatus::Paid);
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(700));
    assert_eq!(b.locked_balance, dec(0));
}

#[tokio::test]
async fn test_otp_already_completed_syncs_as_success() {
    let h = harness().await;
    let record = approved_awaiting_otp(&h).await;

    h.gateway.script_otp(Ok(OtpOutcome::AlreadyCompleted));
    let (after, confirmation) = h
        .engine
        .submit_otp(record.id, "123456", &admin())
        .await
        .unwrap();

    assert_eq!(confirmation, OtpConfirmation::AlreadySettled);
    assert_eq!(confirmation.message(), "already completed - status synced");
    assert_eq!(after.status, WithdrawalStatus::Paid);
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(700));
}

#[tokio::test]
async fn test_wrong_otp_keeps_state_and_reservation() {
    let h = harness().await;
    let record = approved_awaiting_otp(&h).await;

    h.gateway
        .script_otp(Ok(OtpOutcome::Rejected("incorrect otp".to_string())));
    let err = h
        .engine
        .submit_otp(record.id, "999999", &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawalError::InvalidOtp(_)));

    // Still awaiting; retry with the right OTP succeeds.
    let current = h.store.get(record.id).await.unwrap().unwrap();
    assert_eq!(current.status, WithdrawalStatus::AwaitingOtp);
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.locked_balance, dec(300));

    h.gateway.script_otp(Ok(OtpOutcome::Verified));
    let (after, _) = h
        .engine
        .submit_otp(record.id, "123456", &admin())
        .await
        .unwrap();
    assert_eq!(after.status, WithdrawalStatus::Paid);
}

#[tokio::test]
async fn test_otp_transport_error_leaves_request_unchanged() {
    let h = harness().await;
    let record = approved_awaiting_otp(&h).await;

    h.gateway.script_otp(Err(GatewayError::Timeout));
    let err = h
        .engine
        .submit_otp(record.id, "123456", &admin())
        .await
        .unwrap_err();
    assert!(matches!(err, WithdrawalError::Gateway(GatewayError::Timeout)));

    let current = h.store.get(record.id).await.unwrap().unwrap();
    assert_eq!(current.status, WithdrawalStatus::AwaitingOtp);
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.locked_balance, dec(300));
}

#[tokio::test]
async fn test_resend_otp_only_while_awaiting() {
    let h = harness().await;
    let record = approved_awaiting_otp(&h).await;

    h.engine.resend_otp(record.id, &admin()).await.unwrap();
    assert_eq!(h.gateway.resend_count(), 1);

    // A different seller's PENDING request: resend is only legal while
    // awaiting the OTP.
    h.ledger.seed(1002, dec(500), dec(0), dec(0)).await;
    let pending = h
        .engine
        .create(NewWithdrawal {
            seller_id: 1002,
            amount: dec(50),
            method: PayoutMethod::MtnMomo,
            details: PaymentDetails::MobileMoney {
                provider: "MTN".to_string(),
                phone: "0244000001".to_string(),
            },
        })
        .await
        .unwrap();
    assert!(matches!(
        h.engine.resend_otp(pending.id, &admin()).await,
        Err(WithdrawalError::InvalidState { .. })
    ));
}

// ============================================================================
// Verify / reconcile
// ============================================================================

#[tokio::test]
async fn test_verify_corrects_stuck_processing_to_paid() {
    let h = harness().await;
    let record = create(&h, 300).await;

    h.gateway.script_initiate(ScriptedInitiate::Pend);
    let after = h.engine.approve(record.id, &admin()).await.unwrap();
    assert_eq!(after.status, WithdrawalStatus::Processing);

    h.gateway.script_status(Ok(RemoteStatus::Success));
    let outcome = h.engine.verify(record.id, Some(&admin())).await.unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.record.status, WithdrawalStatus::Paid);
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(700));
    assert_eq!(b.locked_balance, dec(0));
}

#[tokio::test]
async fn test_verify_is_idempotent_and_never_double_commits() {
    let h = harness().await;
    let record = create(&h, 300).await;

    h.gateway.script_initiate(ScriptedInitiate::Pend);
    h.engine.approve(record.id, &admin()).await.unwrap();
    h.gateway.script_status(Ok(RemoteStatus::Success));

    let first = h.engine.verify(record.id, Some(&admin())).await.unwrap();
    let second = h.engine.verify(record.id, Some(&admin())).await.unwrap();
    let third = h.engine.verify(record.id, None).await.unwrap();

    assert!(first.changed);
    assert!(!second.changed);
    assert!(!third.changed);

    // Balance committed exactly once across all three passes.
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(700));
    assert_eq!(b.locked_balance, dec(0));
}

#[tokio::test]
async fn test_verify_remote_failure_releases_reservation() {
    let h = harness().await;
    let record = create(&h, 300).await;

    h.gateway.script_initiate(ScriptedInitiate::Pend);
    h.engine.approve(record.id, &admin()).await.unwrap();

    h.gateway
        .script_status(Ok(RemoteStatus::Failed("recipient blocked".to_string())));
    let outcome = h.engine.verify(record.id, None).await.unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.record.status, WithdrawalStatus::Failed);
    assert!(outcome.record.error.as_deref().unwrap().contains("recipient blocked"));
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(1000));
    assert_eq!(b.locked_balance, dec(0));
}

#[tokio::test]
async fn test_verify_remote_failure_never_claws_back_paid() {
    let h = harness().await;
    let record = create(&h, 300).await;

    h.gateway.script_initiate(ScriptedInitiate::Complete);
    h.engine.approve(record.id, &admin()).await.unwrap();

    // Gateway later claims failure; we keep PAID and only flag it.
    h.gateway
        .script_status(Ok(RemoteStatus::Failed("reversed".to_string())));
    let outcome = h.engine.verify(record.id, Some(&admin())).await.unwrap();

    assert!(!outcome.changed);
    assert_eq!(outcome.record.status, WithdrawalStatus::Paid);
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(700));
}

#[tokio::test]
async fn test_verify_without_gateway_reference() {
    let h = harness().await;
    let record = create(&h, 300).await;

    assert!(matches!(
        h.engine.verify(record.id, Some(&admin())).await,
        Err(WithdrawalError::NoGatewayReference)
    ));
}

#[tokio::test]
async fn test_verify_promotes_processing_to_awaiting_otp() {
    let h = harness().await;
    let record = create(&h, 300).await;

    h.gateway.script_initiate(ScriptedInitiate::Pend);
    h.engine.approve(record.id, &admin()).await.unwrap();

    h.gateway.script_status(Ok(RemoteStatus::OtpRequired));
    let outcome = h.engine.verify(record.id, None).await.unwrap();

    assert!(outcome.changed);
    assert_eq!(outcome.record.status, WithdrawalStatus::AwaitingOtp);
    // Reservation untouched by the promotion.
    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.locked_balance, dec(300));
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_retry_failed_uses_fresh_idempotency_reference() {
    let h = harness().await;
    let record = create(&h, 300).await;

    h.gateway
        .script_initiate(ScriptedInitiate::Decline("flaky".to_string()));
    let failed = h.engine.approve(record.id, &admin()).await.unwrap();
    assert_eq!(failed.status, WithdrawalStatus::Failed);

    h.gateway.script_initiate(ScriptedInitiate::Complete);
    let after = h.engine.retry_failed(record.id, &admin()).await.unwrap();

    assert_eq!(after.status, WithdrawalStatus::Paid);
    assert_eq!(after.attempt, 1);

    // Attempt 0 and attempt 1 each initiated exactly once, under distinct
    // references.
    let first_ref = format!("{}:0", record.id);
    let second_ref = format!("{}:1", record.id);
    assert_eq!(h.gateway.initiations_for(&first_ref), 1);
    assert_eq!(h.gateway.initiations_for(&second_ref), 1);

    let b = h.ledger.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(700));
    assert_eq!(b.locked_balance, dec(0));
}

#[tokio::test]
async fn test_retry_rejected_request_refused() {
    let h = harness().await;
    let record = create(&h, 300).await;
    h.engine.reject(record.id, "bad account", &admin()).await.unwrap();

    assert!(matches!(
        h.engine.retry_failed(record.id, &admin()).await,
        Err(WithdrawalError::InvalidState { .. })
    ));
}

// ============================================================================
// Worker sweep
// ============================================================================

#[tokio::test]
async fn test_worker_sweep_reconciles_stale_processing() {
    use super::worker::{ReconcileWorker, WorkerConfig};
    use std::time::Duration;

    let store = Arc::new(MemoryStore::new());
    let ledger = Arc::new(MemoryLedger::new());
    let gateway = Arc::new(MockGateway::new());
    ledger.seed(1001, dec(1000), dec(0), dec(0)).await;

    let engine = Arc::new(LifecycleEngine::new(
        Arc::clone(&store) as Arc<dyn WithdrawalStore>,
        Arc::clone(&ledger) as Arc<dyn Ledger>,
        Arc::clone(&gateway) as Arc<dyn super::gateway::TransferGateway>,
    ));

    let record = engine.create(momo_request(300)).await.unwrap();
    gateway.script_initiate(ScriptedInitiate::Pend);
    engine.approve(record.id, &admin()).await.unwrap();

    gateway.script_status(Ok(RemoteStatus::Success));
    let worker = ReconcileWorker::new(
        Arc::clone(&engine),
        WorkerConfig {
            scan_interval: Duration::from_secs(1),
            stale_threshold: Duration::ZERO,
            batch_size: 10,
        },
    );

    let corrected = worker.scan_and_reconcile().await.unwrap();
    assert_eq!(corrected, 1);

    let after = store.get(record.id).await.unwrap().unwrap();
    assert_eq!(after.status, WithdrawalStatus::Paid);

    // Second sweep: nothing stale (terminal), nothing changes.
    let corrected = worker.scan_and_reconcile().await.unwrap();
    assert_eq!(corrected, 0);
    let b = ledger.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(700));
}

/// Ledger wrapper whose `commit` can be switched to fail, simulating a
/// database outage between the status CAS and the balance mutation
struct FlakyCommitLedger {
    inner: Arc<MemoryLedger>,
    fail_commit: AtomicBool,
}

impl FlakyCommitLedger {
    fn new(inner: Arc<MemoryLedger>) -> Self {
        Self {
            inner,
            fail_commit: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Ledger for FlakyCommitLedger {
    async fn get(&self, seller_id: i64) -> Result<SellerBalance, LedgerError> {
        self.inner.get(seller_id).await
    }

    async fn reserve(&self, seller_id: i64, amount: Decimal) -> Result<(), LedgerError> {
        self.inner.reserve(seller_id, amount).await
    }

    async fn release(&self, seller_id: i64, amount: Decimal) -> Result<(), LedgerError> {
        self.inner.release(seller_id, amount).await
    }

    async fn commit(&self, seller_id: i64, amount: Decimal) -> Result<(), LedgerError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(LedgerError::Database("connection reset".to_string()));
        }
        self.inner.commit(seller_id, amount).await
    }
}

#[tokio::test]
async fn test_sweep_retries_commit_owed_by_paid_transition() {
    use super::worker::{ReconcileWorker, WorkerConfig};
    use std::time::Duration;

    let store = Arc::new(MemoryStore::new());
    let inner = Arc::new(MemoryLedger::new());
    let flaky = Arc::new(FlakyCommitLedger::new(Arc::clone(&inner)));
    let gateway = Arc::new(MockGateway::new());
    inner.seed(1001, dec(1000), dec(0), dec(0)).await;

    let engine = Arc::new(LifecycleEngine::new(
        Arc::clone(&store) as Arc<dyn WithdrawalStore>,
        Arc::clone(&flaky) as Arc<dyn Ledger>,
        Arc::clone(&gateway) as Arc<dyn super::gateway::TransferGateway>,
    ));

    let record = engine.create(momo_request(300)).await.unwrap();
    gateway.script_initiate(ScriptedInitiate::Pend);
    engine.approve(record.id, &admin()).await.unwrap();

    // Ledger goes down right as the gateway confirms success: the request
    // lands in PAID but the commit doesn't.
    flaky.fail_commit.store(true, Ordering::SeqCst);
    gateway.script_status(Ok(RemoteStatus::Success));
    let outcome = engine.verify(record.id, None).await.unwrap();
    assert!(outcome.changed);
    assert_eq!(outcome.record.status, WithdrawalStatus::Paid);
    assert!(!outcome.record.ledger_settled);

    // Funds still locked, and the owed commit is flagged for the sweep.
    let b = inner.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(1000));
    assert_eq!(b.locked_balance, dec(300));
    assert_eq!(store.find_unsettled(10).await.unwrap().len(), 1);

    // Ledger recovers; the next sweep re-drives the commit.
    flaky.fail_commit.store(false, Ordering::SeqCst);
    let worker = ReconcileWorker::new(
        Arc::clone(&engine),
        WorkerConfig {
            scan_interval: Duration::from_secs(1),
            stale_threshold: Duration::from_secs(3600),
            batch_size: 10,
        },
    );
    let settled = worker.scan_and_reconcile().await.unwrap();
    assert_eq!(settled, 1);

    let b = inner.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(700));
    assert_eq!(b.locked_balance, dec(0));
    let after = store.get(record.id).await.unwrap().unwrap();
    assert!(after.ledger_settled);
    assert!(store.find_unsettled(10).await.unwrap().is_empty());

    // Nothing owed on the next pass; the commit landed exactly once.
    assert_eq!(worker.scan_and_reconcile().await.unwrap(), 0);
    let b = inner.get(1001).await.unwrap();
    assert_eq!(b.balance, dec(700));
}

// ============================================================================
// Listing and audit trail
// ============================================================================

#[tokio::test]
async fn test_list_filters_and_pagination() {
    let h = harness().await;
    h.ledger.seed(1002, dec(500), dec(0), dec(0)).await;

    let a = create(&h, 100).await;
    h.engine.reject(a.id, "nope", &admin()).await.unwrap();
    let b = create(&h, 100).await;
    let _c = h
        .engine
        .create(NewWithdrawal {
            seller_id: 1002,
            amount: dec(50),
            method: PayoutMethod::Bank,
            details: PaymentDetails::Bank {
                account_number: "0123456789".to_string(),
                account_name: "Ama Mensah".to_string(),
                bank_code: "058".to_string(),
            },
        })
        .await
        .unwrap();

    let filter = ListFilter {
        seller_id: Some(1001),
        ..Default::default()
    }
    .with_limits(20, 0);
    let (page, total) = h.engine.list(&filter).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(page.len(), 2);
    // Newest first.
    assert_eq!(page[0].id, b.id);

    let filter = ListFilter {
        status: Some(WithdrawalStatus::Rejected),
        ..Default::default()
    }
    .with_limits(20, 0);
    let (page, total) = h.engine.list(&filter).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(page[0].id, a.id);

    let filter = ListFilter::default().with_limits(1, 1);
    let (page, total) = h.engine.list(&filter).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 1);
}

#[tokio::test]
async fn test_audit_trail_is_append_only_across_retry() {
    use super::types::AuditAction;

    let h = harness().await;
    let record = create(&h, 300).await;

    h.gateway
        .script_initiate(ScriptedInitiate::Decline("flaky".to_string()));
    h.engine.approve(record.id, &admin()).await.unwrap();

    h.gateway.script_initiate(ScriptedInitiate::Complete);
    let other_admin = AdminContext::new("admin-2", "superadmin");
    let after = h.engine.retry_failed(record.id, &other_admin).await.unwrap();

    // First approval block survives the retry; both actors visible.
    let actions: Vec<AuditAction> = after.audit.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![AuditAction::Approved, AuditAction::Retried]);
    assert_eq!(after.audit[0].admin_id, "admin-1");
    assert_eq!(after.audit[1].admin_id, "admin-2");
}
