//! Admin Payout API
//!
//! Thin request/response layer the dashboard calls; delegates entirely to
//! the lifecycle engine. Standard `ApiResponse` envelope with numeric error
//! codes plus the engine's stable string kinds.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};

use crate::ledger::SellerBalance;

use super::engine::LifecycleEngine;
use super::error::WithdrawalError;
use super::state::WithdrawalStatus;
use super::store::ListFilter;
use super::types::{AdminContext, WithdrawalId, WithdrawalRecord};

/// API wrapper for standard response format
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
    /// Stable machine-readable kind for error branches
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<&'static str>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            data: Some(data),
            msg: None,
            kind: None,
        }
    }

    pub fn error(code: i32, kind: &'static str, msg: impl ToString) -> Self {
        Self {
            code,
            data: None,
            msg: Some(msg.to_string()),
            kind: Some(kind),
        }
    }
}

pub mod error_codes {
    pub const INVALID_PARAMETER: i32 = -1001;
    pub const INVALID_OTP: i32 = -1002;
    pub const MISSING_REASON: i32 = -1003;
    pub const INVALID_STATE: i32 = -2001;
    pub const ANOTHER_ACTIVE_REQUEST: i32 = -2002;
    pub const REQUEST_DEACTIVATED: i32 = -2003;
    pub const INSUFFICIENT_BALANCE: i32 = -2004;
    pub const NOT_FOUND: i32 = -3001;
    pub const NO_GATEWAY_REFERENCE: i32 = -4001;
    pub const GATEWAY_ERROR: i32 = -4002;
    pub const UNAUTHORIZED: i32 = -5001;
    pub const INTERNAL_ERROR: i32 = -6001;
}

type ApiError = (StatusCode, Json<ApiResponse<()>>);

fn map_error(e: &WithdrawalError) -> ApiError {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let code = match e {
        WithdrawalError::InvalidAmount | WithdrawalError::OtpFormat => error_codes::INVALID_PARAMETER,
        WithdrawalError::MissingReason => error_codes::MISSING_REASON,
        WithdrawalError::InvalidState { .. } => error_codes::INVALID_STATE,
        WithdrawalError::RequestDeactivated => error_codes::REQUEST_DEACTIVATED,
        WithdrawalError::AnotherActiveRequest => error_codes::ANOTHER_ACTIVE_REQUEST,
        WithdrawalError::InsufficientBalance => error_codes::INSUFFICIENT_BALANCE,
        WithdrawalError::NoGatewayReference => error_codes::NO_GATEWAY_REFERENCE,
        WithdrawalError::InvalidOtp(_) => error_codes::INVALID_OTP,
        WithdrawalError::Gateway(_) => error_codes::GATEWAY_ERROR,
        WithdrawalError::NotFound(_) | WithdrawalError::SellerNotFound(_) => error_codes::NOT_FOUND,
        WithdrawalError::DatabaseError(_) | WithdrawalError::SystemError(_) => {
            error_codes::INTERNAL_ERROR
        }
    };

    (status, Json(ApiResponse::error(code, e.code(), e)))
}

/// Admin identity comes from the auth proxy in front of this service
fn admin_context(headers: &HeaderMap) -> Result<AdminContext, ApiError> {
    let admin_id = headers
        .get("x-admin-id")
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ApiResponse::error(
                    error_codes::UNAUTHORIZED,
                    "UNAUTHORIZED",
                    "Missing X-Admin-Id header",
                )),
            )
        })?;

    let role = headers
        .get("x-admin-role")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("admin");

    let mut ctx = AdminContext::new(admin_id, role);
    ctx.ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string());
    ctx.user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Ok(ctx)
}

fn parse_id(raw: &str) -> Result<WithdrawalId, ApiError> {
    raw.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                error_codes::INVALID_PARAMETER,
                "INVALID_REQUEST_ID",
                format!("Invalid withdrawal request id: {raw}"),
            )),
        )
    })
}

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub seller_id: Option<i64>,
    /// Dashboard status string, e.g. "pending", "awaiting_paystack_otp"
    pub status: Option<String>,
    pub is_active: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub count: usize,
    pub total_count: i64,
    pub data: Vec<WithdrawalRecord>,
}

#[derive(Debug, Serialize)]
pub struct DetailResponse {
    #[serde(flatten)]
    pub request: WithdrawalRecord,
    pub seller_balance: BalanceSnapshot,
}

#[derive(Debug, Serialize)]
pub struct BalanceSnapshot {
    pub balance: rust_decimal::Decimal,
    pub locked_balance: rust_decimal::Decimal,
    pub pending_balance: rust_decimal::Decimal,
    pub withdrawable_balance: rust_decimal::Decimal,
}

impl From<SellerBalance> for BalanceSnapshot {
    fn from(b: SellerBalance) -> Self {
        Self {
            balance: b.balance,
            locked_balance: b.locked_balance,
            pending_balance: b.pending_balance,
            withdrawable_balance: b.withdrawable(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RejectBody {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct OtpBody {
    pub otp: String,
}

#[derive(Debug, Serialize)]
pub struct OtpResponse {
    #[serde(flatten)]
    pub request: WithdrawalRecord,
    /// "OTP verified" vs "already completed - status synced"
    pub confirmation: &'static str,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    #[serde(flatten)]
    pub request: WithdrawalRecord,
    pub changed: bool,
}

// ============================================================================
// Handlers
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<LifecycleEngine>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/admin/payout/requests", get(list_requests))
        .route("/admin/payout/requests/{id}", get(get_request))
        .route("/admin/payout/requests/{id}/approve", post(approve))
        .route("/admin/payout/requests/{id}/reject", post(reject))
        .route("/admin/payout/requests/{id}/verify", post(verify))
        .route("/admin/payout/requests/{id}/otp", post(submit_otp))
        .route("/admin/payout/requests/{id}/otp/resend", post(resend_otp))
        .route("/admin/payout/requests/{id}/retry", post(retry))
        .with_state(state)
}

async fn health() -> Json<ApiResponse<&'static str>> {
    Json(ApiResponse::success("ok"))
}

async fn list_requests(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse<ListResponse>>, ApiError> {
    let status = match params.status.as_deref() {
        None => None,
        Some(raw) => Some(parse_status(raw)?),
    };

    let filter = ListFilter {
        seller_id: params.seller_id,
        status,
        is_active: params.is_active,
        ..Default::default()
    }
    .with_limits(params.limit.unwrap_or(20), params.offset.unwrap_or(0));

    let (data, total_count) = state.engine.list(&filter).await.map_err(|e| map_error(&e))?;
    Ok(Json(ApiResponse::success(ListResponse {
        count: data.len(),
        total_count,
        data,
    })))
}

fn parse_status(raw: &str) -> Result<WithdrawalStatus, ApiError> {
    const ALL: [WithdrawalStatus; 6] = [
        WithdrawalStatus::Pending,
        WithdrawalStatus::Processing,
        WithdrawalStatus::AwaitingOtp,
        WithdrawalStatus::Paid,
        WithdrawalStatus::Failed,
        WithdrawalStatus::Rejected,
    ];
    ALL.into_iter().find(|s| s.as_str() == raw).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error(
                error_codes::INVALID_PARAMETER,
                "INVALID_STATUS_FILTER",
                format!("Unknown status: {raw}"),
            )),
        )
    })
}

async fn get_request(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<DetailResponse>>, ApiError> {
    let id = parse_id(&id)?;
    let (request, balance) = state
        .engine
        .get_with_balance(id)
        .await
        .map_err(|e| map_error(&e))?;

    Ok(Json(ApiResponse::success(DetailResponse {
        request,
        seller_balance: balance.into(),
    })))
}

async fn approve(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<DetailResponse>>, ApiError> {
    let id = parse_id(&id)?;
    let ctx = admin_context(&headers)?;

    state.engine.approve(id, &ctx).await.map_err(|e| map_error(&e))?;

    // Include the post-approval balance snapshot for the dashboard.
    let (request, balance) = state
        .engine
        .get_with_balance(id)
        .await
        .map_err(|e| map_error(&e))?;
    Ok(Json(ApiResponse::success(DetailResponse {
        request,
        seller_balance: balance.into(),
    })))
}

async fn reject(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<RejectBody>,
) -> Result<Json<ApiResponse<WithdrawalRecord>>, ApiError> {
    let id = parse_id(&id)?;
    let ctx = admin_context(&headers)?;

    let request = state
        .engine
        .reject(id, &body.reason, &ctx)
        .await
        .map_err(|e| map_error(&e))?;
    Ok(Json(ApiResponse::success(request)))
}

async fn verify(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<VerifyResponse>>, ApiError> {
    let id = parse_id(&id)?;
    let ctx = admin_context(&headers)?;

    let outcome = state
        .engine
        .verify(id, Some(&ctx))
        .await
        .map_err(|e| map_error(&e))?;
    Ok(Json(ApiResponse::success(VerifyResponse {
        request: outcome.record,
        changed: outcome.changed,
    })))
}

async fn submit_otp(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<OtpBody>,
) -> Result<Json<ApiResponse<OtpResponse>>, ApiError> {
    let id = parse_id(&id)?;
    let ctx = admin_context(&headers)?;

    let (request, confirmation) = state
        .engine
        .submit_otp(id, &body.otp, &ctx)
        .await
        .map_err(|e| map_error(&e))?;
    Ok(Json(ApiResponse::success(OtpResponse {
        request,
        confirmation: confirmation.message(),
    })))
}

async fn resend_otp(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<&'static str>>, ApiError> {
    let id = parse_id(&id)?;
    let ctx = admin_context(&headers)?;

    state
        .engine
        .resend_otp(id, &ctx)
        .await
        .map_err(|e| map_error(&e))?;
    Ok(Json(ApiResponse::success("otp_resent")))
}

async fn retry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse<WithdrawalRecord>>, ApiError> {
    let id = parse_id(&id)?;
    let ctx = admin_context(&headers)?;

    let request = state
        .engine
        .retry_failed(id, &ctx)
        .await
        .map_err(|e| map_error(&e))?;
    Ok(Json(ApiResponse::success(request)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status_filter() {
        assert_eq!(parse_status("pending").unwrap(), WithdrawalStatus::Pending);
        assert_eq!(
            parse_status("awaiting_paystack_otp").unwrap(),
            WithdrawalStatus::AwaitingOtp
        );
        assert!(parse_status("bogus").is_err());
    }

    #[test]
    fn test_admin_context_extraction() {
        let mut headers = HeaderMap::new();
        assert!(admin_context(&headers).is_err());

        headers.insert("x-admin-id", "admin-7".parse().unwrap());
        headers.insert("x-admin-role", "superadmin".parse().unwrap());
        headers.insert("x-forwarded-for", "10.0.0.9, 172.16.0.1".parse().unwrap());

        let ctx = admin_context(&headers).unwrap();
        assert_eq!(ctx.admin_id, "admin-7");
        assert_eq!(ctx.role, "superadmin");
        assert_eq!(ctx.ip.as_deref(), Some("10.0.0.9"));
    }

    #[test]
    fn test_error_mapping_attaches_kind() {
        let (status, Json(body)) = map_error(&WithdrawalError::InsufficientBalance);
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.code, error_codes::INSUFFICIENT_BALANCE);
        assert_eq!(body.kind, Some("INSUFFICIENT_BALANCE"));
    }
}
