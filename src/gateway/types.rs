//! API response types and DTOs
//!
//! - `ApiResponse<T>`: unified response wrapper with a stable string code
//! - `ApiResult<T>`: type alias for handler return types
//! - `ApiError`: unified error type with IntoResponse, mapped from
//!   `EngineError` so internal diagnostics never reach clients

use axum::{Json, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::EngineError;
use crate::models::{PaymentMethod, Transaction};

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper.
///
/// - code: "OK" on success, a stable error code otherwise
/// - msg: short human-readable description
/// - data: payload (success only)
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: String,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: "OK".to_string(),
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: impl Into<String>, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code: code.into(),
            msg: msg.into(),
            data: None,
        }
    }
}

/// Type alias for handler return types - reduces boilerplate.
pub type ApiResult<T> =
    Result<(StatusCode, Json<ApiResponse<T>>), (StatusCode, Json<ApiResponse<()>>)>;

/// Helper to create success response (200 OK).
#[inline]
pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::OK, Json(ApiResponse::success(data))))
}

/// Helper to create created response (201).
#[inline]
pub fn created<T: Serialize>(data: T) -> ApiResult<T> {
    Ok((StatusCode::CREATED, Json(ApiResponse::success(data))))
}

// ============================================================================
// ApiError
// ============================================================================

/// Unified API error with automatic IntoResponse.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_PARAMETER", msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
    }

    /// Convert to handler error tuple.
    pub fn into_err<T>(self) -> ApiResult<T> {
        Err((
            self.status,
            Json(ApiResponse::<()>::error(self.code, self.message)),
        ))
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // Client-visible message; store/internal detail stays in the logs
        let message = match &e {
            EngineError::StoreUnavailable(_) => "backing store unavailable".to_string(),
            EngineError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        Self::new(status, e.code(), message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(ApiResponse::<()>::error(self.code, self.message));
        (self.status, body).into_response()
    }
}

impl From<ApiError> for (StatusCode, Json<ApiResponse<()>>) {
    fn from(err: ApiError) -> Self {
        (
            err.status,
            Json(ApiResponse::<()>::error(err.code, err.message)),
        )
    }
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

/// Body of `POST /functions/{id}/holds` and `DELETE /functions/{id}/holds`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct HoldRequest {
    #[schema(example = json!(["A5", "A6"]))]
    pub seats: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HoldResponse {
    pub seats: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReleaseResponse {
    pub released: Vec<String>,
}

/// Body of `POST /transactions`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PurchaseBody {
    pub function: Uuid,
    #[schema(example = json!(["A5", "A6"]))]
    pub seats: Vec<String>,
    pub method: PaymentMethod,
    #[serde(default)]
    pub promo: Option<String>,
}

/// Client-facing view of a transaction.
#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionView {
    pub id: Uuid,
    pub invoice: String,
    pub function: Uuid,
    pub film: Uuid,
    pub state: String,
    pub seats: Vec<String>,
    pub subtotal: i64,
    pub tax: i64,
    pub total: i64,
    pub method: PaymentMethod,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_payload: Option<String>,
}

impl From<&Transaction> for TransactionView {
    fn from(tx: &Transaction) -> Self {
        Self {
            id: tx.id,
            invoice: tx.invoice.clone(),
            function: tx.function_id,
            film: tx.film_id,
            state: tx.state.as_str().to_string(),
            seats: tx.seats.iter().map(|l| l.code.to_string()).collect(),
            subtotal: tx.subtotal,
            tax: tx.tax,
            total: tx.total,
            method: tx.payment.method,
            created_at: tx.created_at,
            expires_at: tx.expires_at,
            confirmed_at: tx.confirmed_at,
            qr_payload: tx.qr_payload.clone(),
        }
    }
}

/// One row of the film sales ranking.
#[derive(Debug, Serialize, ToSchema)]
pub struct RankingEntry {
    pub position: usize,
    pub film: String,
    pub sales: i64,
}
