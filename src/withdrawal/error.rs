//! Withdrawal Error Types
//!
//! Every error carries a stable machine-readable kind (`code()`) plus a
//! human-readable message, so the dashboard can branch without string
//! matching.

use thiserror::Error;

use super::state::WithdrawalStatus;

/// Errors from the external transfer gateway
#[derive(Error, Debug, Clone)]
pub enum GatewayError {
    #[error("Gateway request timed out")]
    Timeout,

    #[error("Gateway returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Gateway declined the transfer: {0}")]
    Declined(String),

    #[error("Gateway transport error: {0}")]
    Transport(String),
}

impl GatewayError {
    /// A transport/timeout error means the remote outcome is unknown; the
    /// call is safe to retry verbatim given idempotency references.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Timeout | GatewayError::Transport(_))
    }
}

/// Withdrawal lifecycle error types
#[derive(Error, Debug, Clone)]
pub enum WithdrawalError {
    // === Validation Errors (rejected before any mutation) ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Rejection reason must not be empty")]
    MissingReason,

    #[error("OTP must be numeric and at least {min} digits", min = super::gateway::OTP_MIN_LEN)]
    OtpFormat,

    // === State-Conflict Errors (current status attached) ===
    #[error("Request is in status '{current}', expected '{expected}'")]
    InvalidState {
        current: WithdrawalStatus,
        expected: WithdrawalStatus,
    },

    #[error("Request was deactivated by the seller and is display-only")]
    RequestDeactivated,

    #[error("Seller already has another withdrawal request in flight")]
    AnotherActiveRequest,

    #[error("Amount exceeds the seller's withdrawable balance")]
    InsufficientBalance,

    // === Gateway Errors ===
    #[error("Request has no gateway transfer reference yet")]
    NoGatewayReference,

    #[error("Gateway rejected the OTP: {0}")]
    InvalidOtp(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    // === System Errors ===
    #[error("Withdrawal request not found: {0}")]
    NotFound(String),

    #[error("Seller balance not found: {0}")]
    SellerNotFound(i64),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal system error: {0}")]
    SystemError(String),
}

impl WithdrawalError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            WithdrawalError::InvalidAmount => "INVALID_AMOUNT",
            WithdrawalError::MissingReason => "MISSING_REASON",
            WithdrawalError::OtpFormat => "INVALID_OTP_FORMAT",
            WithdrawalError::InvalidState { .. } => "INVALID_STATE",
            WithdrawalError::RequestDeactivated => "REQUEST_DEACTIVATED",
            WithdrawalError::AnotherActiveRequest => "CONFLICT_ANOTHER_ACTIVE_REQUEST",
            WithdrawalError::InsufficientBalance => "INSUFFICIENT_BALANCE",
            WithdrawalError::NoGatewayReference => "NO_GATEWAY_REFERENCE",
            WithdrawalError::InvalidOtp(_) => "INVALID_OTP",
            WithdrawalError::Gateway(GatewayError::Timeout) => "GATEWAY_TIMEOUT",
            WithdrawalError::Gateway(_) => "GATEWAY_ERROR",
            WithdrawalError::NotFound(_) => "NOT_FOUND",
            WithdrawalError::SellerNotFound(_) => "SELLER_NOT_FOUND",
            WithdrawalError::DatabaseError(_) => "DATABASE_ERROR",
            WithdrawalError::SystemError(_) => "SYSTEM_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            WithdrawalError::InvalidAmount
            | WithdrawalError::MissingReason
            | WithdrawalError::OtpFormat => 400,
            WithdrawalError::InvalidState { .. }
            | WithdrawalError::RequestDeactivated
            | WithdrawalError::AnotherActiveRequest => 409,
            WithdrawalError::InsufficientBalance => 422,
            WithdrawalError::InvalidOtp(_) | WithdrawalError::NoGatewayReference => 422,
            WithdrawalError::NotFound(_) | WithdrawalError::SellerNotFound(_) => 404,
            WithdrawalError::Gateway(GatewayError::Timeout) => 504,
            WithdrawalError::Gateway(_) => 502,
            WithdrawalError::DatabaseError(_) | WithdrawalError::SystemError(_) => 500,
        }
    }
}

impl From<sqlx::Error> for WithdrawalError {
    fn from(e: sqlx::Error) -> Self {
        WithdrawalError::DatabaseError(e.to_string())
    }
}

impl From<anyhow::Error> for WithdrawalError {
    fn from(e: anyhow::Error) -> Self {
        WithdrawalError::SystemError(e.to_string())
    }
}

impl From<crate::ledger::LedgerError> for WithdrawalError {
    fn from(e: crate::ledger::LedgerError) -> Self {
        match e {
            crate::ledger::LedgerError::InsufficientWithdrawable => {
                WithdrawalError::InsufficientBalance
            }
            crate::ledger::LedgerError::SellerNotFound(id) => WithdrawalError::SellerNotFound(id),
            crate::ledger::LedgerError::ReservationUnderflow => WithdrawalError::SystemError(
                "ledger reservation underflow - locked balance below release amount".to_string(),
            ),
            crate::ledger::LedgerError::Database(msg) => WithdrawalError::DatabaseError(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            WithdrawalError::InsufficientBalance.code(),
            "INSUFFICIENT_BALANCE"
        );
        assert_eq!(
            WithdrawalError::AnotherActiveRequest.code(),
            "CONFLICT_ANOTHER_ACTIVE_REQUEST"
        );
        assert_eq!(WithdrawalError::MissingReason.code(), "MISSING_REASON");
        assert_eq!(
            WithdrawalError::Gateway(GatewayError::Timeout).code(),
            "GATEWAY_TIMEOUT"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(WithdrawalError::MissingReason.http_status(), 400);
        assert_eq!(
            WithdrawalError::InvalidState {
                current: WithdrawalStatus::Paid,
                expected: WithdrawalStatus::Pending,
            }
            .http_status(),
            409
        );
        assert_eq!(WithdrawalError::InsufficientBalance.http_status(), 422);
        assert_eq!(
            WithdrawalError::NotFound("x".to_string()).http_status(),
            404
        );
        assert_eq!(
            WithdrawalError::Gateway(GatewayError::Timeout).http_status(),
            504
        );
    }

    #[test]
    fn test_state_conflict_names_current_status() {
        let err = WithdrawalError::InvalidState {
            current: WithdrawalStatus::Processing,
            expected: WithdrawalStatus::Pending,
        };
        let msg = err.to_string();
        assert!(msg.contains("processing"));
        assert!(msg.contains("pending"));
    }

    #[test]
    fn test_retryable_gateway_errors() {
        assert!(GatewayError::Timeout.is_retryable());
        assert!(GatewayError::Transport("reset".into()).is_retryable());
        assert!(!GatewayError::Declined("no funds".into()).is_retryable());
    }
}
