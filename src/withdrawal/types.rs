//! Withdrawal Core Types
//!
//! Type definitions for the payout lifecycle engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::WithdrawalStatus;

/// Withdrawal request ID - ULID-based unique identifier
///
/// Using ULID provides:
/// - Monotonic, sortable IDs
/// - No coordination needed (no machine_id)
/// - 128-bit with good entropy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WithdrawalId(ulid::Ulid);

impl WithdrawalId {
    /// Generate a new unique WithdrawalId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }

    /// Get the inner ULID value
    pub fn inner(&self) -> ulid::Ulid {
        self.0
    }
}

impl Default for WithdrawalId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WithdrawalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for WithdrawalId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

/// Payout method requested by the seller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    Bank,
    MtnMomo,
    VodafoneCash,
    AirtelTigoMoney,
    Cash,
}

impl PayoutMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutMethod::Bank => "bank",
            PayoutMethod::MtnMomo => "mtn_momo",
            PayoutMethod::VodafoneCash => "vodafone_cash",
            PayoutMethod::AirtelTigoMoney => "airtel_tigo_money",
            PayoutMethod::Cash => "cash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bank" => Some(PayoutMethod::Bank),
            "mtn_momo" => Some(PayoutMethod::MtnMomo),
            "vodafone_cash" => Some(PayoutMethod::VodafoneCash),
            "airtel_tigo_money" => Some(PayoutMethod::AirtelTigoMoney),
            "cash" => Some(PayoutMethod::Cash),
            _ => None,
        }
    }

    /// Cash payouts are settled over the counter; no gateway leg exists
    #[inline]
    pub fn uses_gateway(&self) -> bool {
        !matches!(self, PayoutMethod::Cash)
    }
}

impl fmt::Display for PayoutMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Method-specific payout destination captured at request creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentDetails {
    Bank {
        account_number: String,
        account_name: String,
        bank_code: String,
    },
    MobileMoney {
        /// Telco provider code understood by the gateway (MTN, VOD, ATL)
        provider: String,
        phone: String,
    },
    Cash,
}

/// Audit action recorded against a withdrawal request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Approved,
    Rejected,
    OtpSubmitted,
    OtpResent,
    Verified,
    Retried,
    Deactivated,
}

/// Identity of the admin (or seller, for deactivation) performing an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminContext {
    pub admin_id: String,
    pub role: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

impl AdminContext {
    pub fn new(admin_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            admin_id: admin_id.into(),
            role: role.into(),
            ip: None,
            user_agent: None,
        }
    }
}

/// One append-only audit block
///
/// Each actor action appends its own block; prior approver/rejecter entries
/// are never overwritten, so the full history stays visible when a request
/// transitions more than once (failed -> retried -> approved again).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub admin_id: String,
    pub role: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub at: DateTime<Utc>,
    /// Free-form note: rejection reason, sync outcome, etc.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl AuditEntry {
    pub fn now(action: AuditAction, ctx: &AdminContext, note: Option<String>) -> Self {
        Self {
            action,
            admin_id: ctx.admin_id.clone(),
            role: ctx.role.clone(),
            ip: ctx.ip.clone(),
            user_agent: ctx.user_agent.clone(),
            at: Utc::now(),
            note,
        }
    }
}

/// Parameters for creating a withdrawal request (seller-side flow)
#[derive(Debug, Clone)]
pub struct NewWithdrawal {
    pub seller_id: i64,
    pub amount: Decimal,
    pub method: PayoutMethod,
    pub details: PaymentDetails,
}

/// Persisted withdrawal request record
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalRecord {
    /// Unique request ID (ULID, also the DB primary key)
    #[serde(serialize_with = "serialize_id")]
    pub id: WithdrawalId,
    /// Owning seller
    pub seller_id: i64,
    /// Requested payout amount
    pub amount: Decimal,
    pub method: PayoutMethod,
    pub details: PaymentDetails,
    /// Current lifecycle status
    #[serde(serialize_with = "serialize_status")]
    pub status: WithdrawalStatus,
    /// Seller-controlled overlay: false makes the request display-only
    pub is_active: bool,
    /// Gateway correlation identifiers, absent before approval
    pub gateway_reference: Option<String>,
    pub gateway_transfer_code: Option<String>,
    pub rejection_reason: Option<String>,
    /// Append-only audit trail
    pub audit: Vec<AuditEntry>,
    /// Approval attempt counter; bumps on manual retry so the gateway
    /// idempotency reference changes
    pub attempt: i32,
    /// Last gateway/engine error (for debugging)
    pub error: Option<String>,
    /// False while a won PAID/FAILED transition still owes its ledger
    /// commit/release; the reconcile sweep retries until it lands
    pub ledger_settled: bool,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

fn serialize_id<S: serde::Serializer>(id: &WithdrawalId, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&id.to_string())
}

fn serialize_status<S: serde::Serializer>(
    status: &WithdrawalStatus,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.serialize_str(status.as_str())
}

impl WithdrawalRecord {
    /// Create a new record in PENDING status
    pub fn new(id: WithdrawalId, req: NewWithdrawal) -> Self {
        let now = Utc::now();
        Self {
            id,
            seller_id: req.seller_id,
            amount: req.amount,
            method: req.method,
            details: req.details,
            status: WithdrawalStatus::Pending,
            is_active: true,
            gateway_reference: None,
            gateway_transfer_code: None,
            rejection_reason: None,
            audit: Vec::new(),
            attempt: 0,
            error: None,
            ledger_settled: true,
            created_at: now,
            processed_at: None,
            updated_at: now,
        }
    }

    /// Stable idempotency reference for the current approval attempt
    ///
    /// Network retries of the same attempt carry the same reference, so the
    /// gateway never creates a duplicate transfer. A manual retry bumps
    /// `attempt` and therefore gets a fresh reference.
    pub fn idempotency_reference(&self) -> String {
        format!("{}:{}", self.id, self.attempt)
    }
}

impl fmt::Display for WithdrawalRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Withdrawal[{}] seller={} amount={} method={} status={}",
            self.id, self.seller_id, self.amount, self.method, self.status
        )
    }
}
