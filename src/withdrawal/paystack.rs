//! Paystack Transfer Client
//!
//! Real [`TransferGateway`] implementation against the Paystack transfer
//! API. Every mutating call carries the engine-supplied idempotency
//! `reference`, so client timeouts followed by retries never create a
//! duplicate transfer on the gateway side.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use super::error::GatewayError;
use super::gateway::{InitiateOutcome, OtpOutcome, RemoteStatus, TransferGateway};
use super::types::PaymentDetails;

#[derive(Debug, Clone)]
pub struct PaystackConfig {
    pub base_url: String,
    pub secret_key: String,
    pub timeout: Duration,
    /// ISO currency for transfers (subunit conversion is x100)
    pub currency: String,
}

impl Default for PaystackConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.paystack.co".to_string(),
            secret_key: String::new(),
            timeout: Duration::from_secs(15),
            currency: "GHS".to_string(),
        }
    }
}

pub struct PaystackClient {
    config: PaystackConfig,
    http: reqwest::Client,
}

// === Wire types ===

#[derive(Debug, Serialize)]
struct RecipientRequest<'a> {
    #[serde(rename = "type")]
    recipient_type: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    account_number: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bank_code: Option<&'a str>,
    currency: &'a str,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct RecipientData {
    recipient_code: String,
}

#[derive(Debug, Serialize)]
struct TransferRequest<'a> {
    source: &'a str,
    /// Amount in the currency subunit (pesewas/kobo)
    amount: i64,
    recipient: &'a str,
    reference: &'a str,
    reason: &'a str,
}

#[derive(Debug, Deserialize)]
struct TransferData {
    status: String,
    transfer_code: String,
    reference: Option<String>,
    #[serde(default)]
    failure_reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct FinalizeRequest<'a> {
    transfer_code: &'a str,
    otp: &'a str,
}

#[derive(Debug, Serialize)]
struct ResendOtpRequest<'a> {
    transfer_code: &'a str,
    reason: &'a str,
}

impl PaystackClient {
    pub fn new(config: PaystackConfig) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn map_transport(e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(e.to_string())
        }
    }

    async fn post<B: Serialize, T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Envelope<T>, GatewayError> {
        let response = self
            .http
            .post(self.url(path))
            .bearer_auth(&self.config.secret_key)
            .json(body)
            .send()
            .await
            .map_err(Self::map_transport)?;

        Self::read_envelope(response).await
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<Envelope<T>, GatewayError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(Self::map_transport)?;

        Self::read_envelope(response).await
    }

    async fn read_envelope<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<Envelope<T>, GatewayError> {
        let status = response.status();
        let body = response.text().await.map_err(Self::map_transport)?;

        if status.is_server_error() {
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|_| GatewayError::Http {
            status: status.as_u16(),
            body,
        })
    }

    /// Create (or re-create; Paystack dedupes) the transfer recipient for
    /// the seller's payout destination.
    async fn ensure_recipient(&self, details: &PaymentDetails) -> Result<String, GatewayError> {
        let request = match details {
            PaymentDetails::Bank {
                account_number,
                account_name,
                bank_code,
            } => RecipientRequest {
                recipient_type: "nuban",
                name: account_name,
                account_number: Some(account_number),
                bank_code: Some(bank_code),
                currency: &self.config.currency,
            },
            PaymentDetails::MobileMoney { provider, phone } => RecipientRequest {
                recipient_type: "mobile_money",
                name: phone,
                account_number: Some(phone),
                bank_code: Some(provider),
                currency: &self.config.currency,
            },
            PaymentDetails::Cash => {
                return Err(GatewayError::Declined(
                    "cash payouts have no gateway recipient".to_string(),
                ));
            }
        };

        let envelope: Envelope<RecipientData> = self.post("/transferrecipient", &request).await?;
        match envelope.data {
            Some(data) if envelope.status => Ok(data.recipient_code),
            _ => Err(GatewayError::Declined(envelope.message)),
        }
    }

    fn subunits(amount: Decimal) -> Result<i64, GatewayError> {
        (amount * Decimal::from(100))
            .round()
            .to_i64()
            .ok_or_else(|| GatewayError::Declined("amount out of range".to_string()))
    }

    fn outcome_from_transfer(data: TransferData) -> Result<InitiateOutcome, GatewayError> {
        let reference = data.reference.unwrap_or_default();
        match data.status.as_str() {
            "otp" => Ok(InitiateOutcome::NeedsOtp {
                reference,
                transfer_code: data.transfer_code,
            }),
            "success" => Ok(InitiateOutcome::Completed {
                reference,
                transfer_code: data.transfer_code,
            }),
            "pending" | "processing" | "queued" => Ok(InitiateOutcome::Pending {
                reference,
                transfer_code: data.transfer_code,
            }),
            "failed" | "reversed" | "abandoned" => Err(GatewayError::Declined(
                data.failure_reason
                    .unwrap_or_else(|| format!("transfer {}", data.status)),
            )),
            other => Err(GatewayError::Declined(format!(
                "unexpected transfer status: {other}"
            ))),
        }
    }
}

#[async_trait]
impl TransferGateway for PaystackClient {
    fn name(&self) -> &'static str {
        "paystack"
    }

    async fn initiate_transfer(
        &self,
        details: &PaymentDetails,
        amount: Decimal,
        reference: &str,
    ) -> Result<InitiateOutcome, GatewayError> {
        let recipient = self.ensure_recipient(details).await?;

        let request = TransferRequest {
            source: "balance",
            amount: Self::subunits(amount)?,
            recipient: &recipient,
            reference,
            reason: "Seller payout",
        };

        let envelope: Envelope<TransferData> = self.post("/transfer", &request).await?;
        match envelope.data {
            Some(data) if envelope.status => Self::outcome_from_transfer(data),
            _ => Err(GatewayError::Declined(envelope.message)),
        }
    }

    async fn submit_otp(&self, transfer_code: &str, otp: &str) -> Result<OtpOutcome, GatewayError> {
        let request = FinalizeRequest { transfer_code, otp };
        let envelope: Envelope<TransferData> =
            self.post("/transfer/finalize_transfer", &request).await?;

        if envelope.status {
            return Ok(OtpOutcome::Verified);
        }

        // Paystack answers with a non-success envelope when the transfer
        // finished asynchronously before the OTP arrived.
        let message = envelope.message.to_lowercase();
        if message.contains("already") && (message.contains("complete") || message.contains("success"))
        {
            Ok(OtpOutcome::AlreadyCompleted)
        } else {
            Ok(OtpOutcome::Rejected(envelope.message))
        }
    }

    async fn resend_otp(&self, transfer_code: &str) -> Result<(), GatewayError> {
        let request = ResendOtpRequest {
            transfer_code,
            reason: "resend_otp",
        };
        let envelope: Envelope<serde_json::Value> =
            self.post("/transfer/resend_otp", &request).await?;

        if envelope.status {
            Ok(())
        } else {
            Err(GatewayError::Declined(envelope.message))
        }
    }

    async fn query_status(&self, transfer_code: &str) -> Result<RemoteStatus, GatewayError> {
        let envelope: Envelope<TransferData> =
            self.get(&format!("/transfer/{transfer_code}")).await?;

        let data = match envelope.data {
            Some(data) if envelope.status => data,
            _ => return Err(GatewayError::Declined(envelope.message)),
        };

        Ok(match data.status.as_str() {
            "success" => RemoteStatus::Success,
            "failed" | "reversed" | "abandoned" => RemoteStatus::Failed(
                data.failure_reason
                    .unwrap_or_else(|| format!("transfer {}", data.status)),
            ),
            "otp" => RemoteStatus::OtpRequired,
            _ => RemoteStatus::Pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subunit_conversion() {
        assert_eq!(PaystackClient::subunits(Decimal::from(300)).unwrap(), 30000);
        assert_eq!(
            PaystackClient::subunits(Decimal::new(1250, 2)).unwrap(), // 12.50
            1250
        );
    }

    #[test]
    fn test_outcome_mapping() {
        let data = TransferData {
            status: "otp".to_string(),
            transfer_code: "TRF_x".to_string(),
            reference: Some("abc:0".to_string()),
            failure_reason: None,
        };
        assert!(matches!(
            PaystackClient::outcome_from_transfer(data),
            Ok(InitiateOutcome::NeedsOtp { .. })
        ));

        let data = TransferData {
            status: "failed".to_string(),
            transfer_code: "TRF_x".to_string(),
            reference: None,
            failure_reason: Some("insufficient gateway balance".to_string()),
        };
        assert!(matches!(
            PaystackClient::outcome_from_transfer(data),
            Err(GatewayError::Declined(_))
        ));
    }
}
