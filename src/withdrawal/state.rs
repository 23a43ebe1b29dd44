//! Withdrawal Status Definitions
//!
//! Status IDs are designed for PostgreSQL storage as SMALLINT.

use std::fmt;

/// Withdrawal request statuses
///
/// Terminal statuses: PAID (40), REJECTED (-20). FAILED (-10) holds no
/// reserved funds and is terminal unless an admin retries it manually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum WithdrawalStatus {
    /// Created by the seller, awaiting admin decision
    Pending = 0,

    /// Approved - funds reserved, gateway transfer dispatched
    Processing = 10,

    /// Gateway requires a one-time passcode to finalize the transfer
    AwaitingOtp = 20,

    /// Terminal: funds committed, transfer completed
    Paid = 40,

    /// Gateway transfer failed - reservation released
    Failed = -10,

    /// Terminal: rejected by an admin before any funds moved
    Rejected = -20,
}

impl WithdrawalStatus {
    /// Check if this status admits no further transitions
    /// (FAILED counts as terminal; the manual retry path re-opens it explicitly)
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Paid | WithdrawalStatus::Rejected | WithdrawalStatus::Failed
        )
    }

    /// Check if this status reserves seller funds (lockedBalance holds `amount`)
    #[inline]
    pub fn holds_reservation(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Processing | WithdrawalStatus::AwaitingOtp
        )
    }

    /// Check if this status counts against the one-active-request-per-seller
    /// invariant
    #[inline]
    pub fn is_exclusive(&self) -> bool {
        matches!(
            self,
            WithdrawalStatus::Pending | WithdrawalStatus::Processing | WithdrawalStatus::AwaitingOtp
        )
    }

    /// Get the numeric status ID for PostgreSQL storage
    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    /// Convert from PostgreSQL status ID
    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(WithdrawalStatus::Pending),
            10 => Some(WithdrawalStatus::Processing),
            20 => Some(WithdrawalStatus::AwaitingOtp),
            40 => Some(WithdrawalStatus::Paid),
            -10 => Some(WithdrawalStatus::Failed),
            -20 => Some(WithdrawalStatus::Rejected),
            _ => None,
        }
    }

    /// Get human-readable status name (matches the dashboard vocabulary)
    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Processing => "processing",
            WithdrawalStatus::AwaitingOtp => "awaiting_paystack_otp",
            WithdrawalStatus::Paid => "paid",
            WithdrawalStatus::Failed => "failed",
            WithdrawalStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for WithdrawalStatus {
    type Error = ();

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        WithdrawalStatus::from_id(value).ok_or(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(WithdrawalStatus::Paid.is_terminal());
        assert!(WithdrawalStatus::Rejected.is_terminal());
        assert!(WithdrawalStatus::Failed.is_terminal());

        assert!(!WithdrawalStatus::Pending.is_terminal());
        assert!(!WithdrawalStatus::Processing.is_terminal());
        assert!(!WithdrawalStatus::AwaitingOtp.is_terminal());
    }

    #[test]
    fn test_reservation_holding_statuses() {
        assert!(WithdrawalStatus::Processing.holds_reservation());
        assert!(WithdrawalStatus::AwaitingOtp.holds_reservation());

        assert!(!WithdrawalStatus::Pending.holds_reservation());
        assert!(!WithdrawalStatus::Paid.holds_reservation());
        assert!(!WithdrawalStatus::Failed.holds_reservation());
        assert!(!WithdrawalStatus::Rejected.holds_reservation());
    }

    #[test]
    fn test_exclusive_statuses() {
        assert!(WithdrawalStatus::Pending.is_exclusive());
        assert!(WithdrawalStatus::Processing.is_exclusive());
        assert!(WithdrawalStatus::AwaitingOtp.is_exclusive());

        assert!(!WithdrawalStatus::Paid.is_exclusive());
        assert!(!WithdrawalStatus::Failed.is_exclusive());
        assert!(!WithdrawalStatus::Rejected.is_exclusive());
    }

    #[test]
    fn test_status_id_roundtrip() {
        let statuses = [
            WithdrawalStatus::Pending,
            WithdrawalStatus::Processing,
            WithdrawalStatus::AwaitingOtp,
            WithdrawalStatus::Paid,
            WithdrawalStatus::Failed,
            WithdrawalStatus::Rejected,
        ];

        for status in statuses {
            let id = status.id();
            let recovered = WithdrawalStatus::from_id(id).unwrap();
            assert_eq!(status, recovered);
        }
    }

    #[test]
    fn test_invalid_status_id() {
        assert!(WithdrawalStatus::from_id(999).is_none());
        assert!(WithdrawalStatus::from_id(-999).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(WithdrawalStatus::Pending.to_string(), "pending");
        assert_eq!(
            WithdrawalStatus::AwaitingOtp.to_string(),
            "awaiting_paystack_otp"
        );
        assert_eq!(WithdrawalStatus::Paid.to_string(), "paid");
    }
}
