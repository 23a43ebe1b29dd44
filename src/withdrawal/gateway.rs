//! Transfer Gateway Seam
//!
//! Adapter trait for the external transfer provider. The gateway is treated
//! as an unreliable network peer: every call has a bounded timeout, and
//! every mutating call carries a stable idempotency reference so retries
//! never create a duplicate transfer.

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::error::GatewayError;
use super::types::PaymentDetails;

/// Minimum OTP digit count accepted before a gateway call is attempted.
/// Malformed input is rejected locally to avoid burning gateway-side OTP
/// attempt quotas.
pub const OTP_MIN_LEN: usize = 4;

/// Check OTP shape locally: numeric, at least [`OTP_MIN_LEN`] digits
pub fn otp_shape_ok(otp: &str) -> bool {
    otp.len() >= OTP_MIN_LEN && otp.chars().all(|c| c.is_ascii_digit())
}

/// Result of initiating a transfer
#[derive(Debug, Clone)]
pub enum InitiateOutcome {
    /// Gateway completed the transfer synchronously
    Completed {
        reference: String,
        transfer_code: String,
    },
    /// Gateway requires OTP confirmation before the transfer proceeds
    NeedsOtp {
        reference: String,
        transfer_code: String,
    },
    /// Gateway accepted the transfer and will settle asynchronously
    Pending {
        reference: String,
        transfer_code: String,
    },
}

/// Result of submitting an OTP
#[derive(Debug, Clone)]
pub enum OtpOutcome {
    /// Gateway accepted the OTP; transfer finalized
    Verified,
    /// Transfer already completed asynchronously before this OTP arrived.
    /// A successful terminal transition, reported distinctly from a fresh
    /// verification ("already completed - status synced").
    AlreadyCompleted,
    /// Incorrect or expired OTP; retry permitted
    Rejected(String),
}

/// Authoritative transfer status reported by the gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Success,
    Failed(String),
    Pending,
    OtpRequired,
}

/// External transfer provider adapter
///
/// `reference` on [`initiate_transfer`](TransferGateway::initiate_transfer)
/// is the idempotency key derived from the withdrawal request; submitting
/// the same reference twice must not create a second transfer.
#[async_trait]
pub trait TransferGateway: Send + Sync {
    /// Gateway name for logging
    fn name(&self) -> &'static str;

    async fn initiate_transfer(
        &self,
        details: &PaymentDetails,
        amount: Decimal,
        reference: &str,
    ) -> Result<InitiateOutcome, GatewayError>;

    async fn submit_otp(&self, transfer_code: &str, otp: &str) -> Result<OtpOutcome, GatewayError>;

    async fn resend_otp(&self, transfer_code: &str) -> Result<(), GatewayError>;

    async fn query_status(&self, transfer_code: &str) -> Result<RemoteStatus, GatewayError>;
}

/// Scriptable gateway for tests
pub mod mock {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// What the mock should do on the next initiate call
    #[derive(Debug, Clone)]
    pub enum ScriptedInitiate {
        Complete,
        NeedOtp,
        Pend,
        Decline(String),
        TimeOut,
    }

    pub struct MockGateway {
        initiate_script: Mutex<ScriptedInitiate>,
        otp_script: Mutex<Result<OtpOutcome, GatewayError>>,
        status_script: Mutex<Result<RemoteStatus, GatewayError>>,
        /// references seen by initiate, per reference -> call count
        initiated: Mutex<HashMap<String, usize>>,
        initiate_count: AtomicUsize,
        otp_count: AtomicUsize,
        resend_count: AtomicUsize,
        query_count: AtomicUsize,
    }

    impl Default for MockGateway {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self {
                initiate_script: Mutex::new(ScriptedInitiate::Complete),
                otp_script: Mutex::new(Ok(OtpOutcome::Verified)),
                status_script: Mutex::new(Ok(RemoteStatus::Pending)),
                initiated: Mutex::new(HashMap::new()),
                initiate_count: AtomicUsize::new(0),
                otp_count: AtomicUsize::new(0),
                resend_count: AtomicUsize::new(0),
                query_count: AtomicUsize::new(0),
            }
        }

        pub fn script_initiate(&self, s: ScriptedInitiate) {
            *self.initiate_script.lock().unwrap() = s;
        }

        pub fn script_otp(&self, r: Result<OtpOutcome, GatewayError>) {
            *self.otp_script.lock().unwrap() = r;
        }

        pub fn script_status(&self, r: Result<RemoteStatus, GatewayError>) {
            *self.status_script.lock().unwrap() = r;
        }

        pub fn initiate_count(&self) -> usize {
            self.initiate_count.load(Ordering::SeqCst)
        }

        pub fn otp_count(&self) -> usize {
            self.otp_count.load(Ordering::SeqCst)
        }

        pub fn resend_count(&self) -> usize {
            self.resend_count.load(Ordering::SeqCst)
        }

        pub fn query_count(&self) -> usize {
            self.query_count.load(Ordering::SeqCst)
        }

        /// How many times a given idempotency reference was initiated
        pub fn initiations_for(&self, reference: &str) -> usize {
            self.initiated
                .lock()
                .unwrap()
                .get(reference)
                .copied()
                .unwrap_or(0)
        }

        fn transfer_code_for(reference: &str) -> String {
            format!("TRF_{reference}")
        }
    }

    #[async_trait]
    impl TransferGateway for MockGateway {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn initiate_transfer(
            &self,
            _details: &PaymentDetails,
            _amount: Decimal,
            reference: &str,
        ) -> Result<InitiateOutcome, GatewayError> {
            self.initiate_count.fetch_add(1, Ordering::SeqCst);
            *self
                .initiated
                .lock()
                .unwrap()
                .entry(reference.to_string())
                .or_insert(0) += 1;

            let code = Self::transfer_code_for(reference);
            match self.initiate_script.lock().unwrap().clone() {
                ScriptedInitiate::Complete => Ok(InitiateOutcome::Completed {
                    reference: reference.to_string(),
                    transfer_code: code,
                }),
                ScriptedInitiate::NeedOtp => Ok(InitiateOutcome::NeedsOtp {
                    reference: reference.to_string(),
                    transfer_code: code,
                }),
                ScriptedInitiate::Pend => Ok(InitiateOutcome::Pending {
                    reference: reference.to_string(),
                    transfer_code: code,
                }),
                ScriptedInitiate::Decline(reason) => Err(GatewayError::Declined(reason)),
                ScriptedInitiate::TimeOut => Err(GatewayError::Timeout),
            }
        }

        async fn submit_otp(
            &self,
            _transfer_code: &str,
            _otp: &str,
        ) -> Result<OtpOutcome, GatewayError> {
            self.otp_count.fetch_add(1, Ordering::SeqCst);
            self.otp_script.lock().unwrap().clone()
        }

        async fn resend_otp(&self, _transfer_code: &str) -> Result<(), GatewayError> {
            self.resend_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn query_status(&self, _transfer_code: &str) -> Result<RemoteStatus, GatewayError> {
            self.query_count.fetch_add(1, Ordering::SeqCst);
            self.status_script.lock().unwrap().clone()
        }
    }
}

pub use mock::MockGateway;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_otp_shape() {
        assert!(otp_shape_ok("123456"));
        assert!(otp_shape_ok("0000"));

        assert!(!otp_shape_ok("123")); // too short
        assert!(!otp_shape_ok("12a456")); // non-numeric
        assert!(!otp_shape_ok("")); // empty
        assert!(!otp_shape_ok("12 34")); // whitespace
    }

    #[tokio::test]
    async fn test_mock_gateway_scripting() {
        let gw = MockGateway::new();
        let details = PaymentDetails::Cash;

        gw.script_initiate(mock::ScriptedInitiate::NeedOtp);
        let out = gw
            .initiate_transfer(&details, Decimal::from(10), "abc:0")
            .await
            .unwrap();
        assert!(matches!(out, InitiateOutcome::NeedsOtp { .. }));
        assert_eq!(gw.initiations_for("abc:0"), 1);

        gw.script_otp(Ok(OtpOutcome::Rejected("expired".to_string())));
        let out = gw.submit_otp("TRF_abc:0", "123456").await.unwrap();
        assert!(matches!(out, OtpOutcome::Rejected(_)));
        assert_eq!(gw.otp_count(), 1);
    }
}
