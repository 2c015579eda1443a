//! API types: response envelope, errors and DTOs
//!
//! - `ApiResponse<T>`: unified `{ code, msg, data }` wrapper
//! - `ApiError` / `ApiResult<T>`: error side of every handler
//! - `error_codes`: numeric envelope codes
//!
//! Money always leaves the gateway as a string with two decimals.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};
use utoipa::{IntoParams, ToSchema};

use crate::account::UserWithWallet;
use crate::cache::WalletView;
use crate::core_types::{AccountId, TransferId, UserId};
use crate::error::{ErrorKind, ServiceError};
use crate::ledger::{Account, Transfer};
use crate::money::format_amount;

// ============================================================================
// Unified API Response Format
// ============================================================================

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or absent (error)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Response code: 0 for success, non-zero for errors
    #[schema(example = 0)]
    pub code: i32,
    /// Response message
    #[schema(example = "ok")]
    pub msg: String,
    /// Response data (only present when code == 0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: error_codes::SUCCESS,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

/// Envelope codes
pub mod error_codes {
    pub const SUCCESS: i32 = 0;
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_BALANCE: i32 = 1002;
    pub const IDEMPOTENCY_CONFLICT: i32 = 1003;
    pub const BALANCE_OVERFLOW: i32 = 1004;
    pub const NOT_FOUND: i32 = 4004;
    pub const REQUEST_IN_PROGRESS: i32 = 4009;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Wrap `data` in a success envelope.
pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    /// Request well-formed but missing a required part (e.g. a header)
    pub fn unprocessable(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            error_codes::INVALID_PARAMETER,
            msg,
        )
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::SERVICE_UNAVAILABLE,
            msg,
        )
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            error_codes::INTERNAL_ERROR,
            msg,
        )
    }

    pub fn into_err<T>(self) -> Result<T, Self> {
        Err(self)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.code, self.msg))).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(e: ServiceError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let code = match &e {
            ServiceError::InsufficientFunds { .. } => error_codes::INSUFFICIENT_BALANCE,
            ServiceError::IdempotencyConflict => error_codes::IDEMPOTENCY_CONFLICT,
            ServiceError::BalanceOverflow(_) => error_codes::BALANCE_OVERFLOW,
            ServiceError::Internal(_) => error_codes::INTERNAL_ERROR,
            _ => match e.kind() {
                ErrorKind::InvalidRequest | ErrorKind::Conflict => error_codes::INVALID_PARAMETER,
                ErrorKind::NotFound => error_codes::NOT_FOUND,
                ErrorKind::RequestInProgress => error_codes::REQUEST_IN_PROGRESS,
                ErrorKind::StorageUnavailable => error_codes::SERVICE_UNAVAILABLE,
            },
        };
        if status.is_server_error() {
            error!(code = e.code(), error = %e, "Request failed");
        } else {
            warn!(code = e.code(), error = %e, "Request rejected");
        }
        // Internal details stay in the log
        let msg = match &e {
            ServiceError::Internal(_) => "Internal error".to_string(),
            other => other.to_string(),
        };
        Self::new(status, code, msg)
    }
}

// ============================================================================
// Request DTOs
// ============================================================================

/// Transfer request body
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateTransferRequest {
    #[schema(example = 1)]
    pub from_wallet_id: AccountId,
    #[schema(example = 2)]
    pub to_wallet_id: AccountId,
    /// Decimal string with at most two fractional digits
    #[schema(example = "25.50")]
    pub amount: Option<String>,
}

/// Wallet history paging
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct HistoryQuery {
    /// Page size, default 50, capped at 500
    pub limit: Option<i64>,
}

// ============================================================================
// Response DTOs
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransferResponse {
    pub id: TransferId,
    pub from_wallet_id: AccountId,
    pub to_wallet_id: AccountId,
    #[schema(example = "25.50")]
    pub amount: String,
    pub created_at: DateTime<Utc>,
}

impl From<Transfer> for TransferResponse {
    fn from(t: Transfer) -> Self {
        Self {
            id: t.id,
            from_wallet_id: t.from_wallet_id,
            to_wallet_id: t.to_wallet_id,
            amount: format_amount(t.amount),
            created_at: t.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    pub id: AccountId,
    #[schema(example = "100.00")]
    pub balance: String,
    pub user_id: UserId,
}

impl From<WalletView> for WalletResponse {
    fn from(w: WalletView) -> Self {
        Self {
            id: w.id,
            balance: format_amount(w.balance),
            user_id: w.user_id,
        }
    }
}

impl From<Account> for WalletResponse {
    fn from(a: Account) -> Self {
        WalletView::from(a).into()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: UserId,
    pub created_at: DateTime<Utc>,
    pub wallet: WalletResponse,
}

impl From<UserWithWallet> for UserResponse {
    fn from(u: UserWithWallet) -> Self {
        Self {
            id: u.id,
            created_at: u.created_at,
            wallet: u.wallet.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::AccountSide;
    use rust_decimal::Decimal;

    #[test]
    fn test_success_envelope() {
        let json = serde_json::to_value(ApiResponse::success(1)).unwrap();
        assert_eq!(json, serde_json::json!({"code": 0, "msg": "ok", "data": 1}));
    }

    #[test]
    fn test_error_envelope_omits_data() {
        let json = serde_json::to_value(ApiResponse::<()>::error(1001, "bad")).unwrap();
        assert_eq!(json, serde_json::json!({"code": 1001, "msg": "bad"}));
    }

    #[test]
    fn test_service_error_mapping() {
        let err = ApiError::from(ServiceError::SameAccount);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, error_codes::INVALID_PARAMETER);

        let err = ApiError::from(ServiceError::AccountNotFound {
            id: 9,
            side: AccountSide::Destination,
        });
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.msg, "destination wallet 9 not found");

        let err = ApiError::from(ServiceError::InsufficientFunds {
            account_id: 1,
            available: Decimal::ONE,
            requested: Decimal::TWO,
        });
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, error_codes::INSUFFICIENT_BALANCE);

        let err = ApiError::from(ServiceError::IdempotencyConflict);
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code, error_codes::IDEMPOTENCY_CONFLICT);

        let err = ApiError::from(ServiceError::RequestInProgress);
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.code, error_codes::REQUEST_IN_PROGRESS);

        let err = ApiError::from(ServiceError::LockTimeout);
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_internal_details_hidden() {
        let err = ApiError::from(ServiceError::Internal("user 3 has no wallet".into()));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.msg, "Internal error");
    }

    #[test]
    fn test_transfer_response_formats_amount() {
        let t = Transfer {
            id: 1,
            from_wallet_id: 1,
            to_wallet_id: 2,
            amount: Decimal::new(255, 1),
            created_at: Utc::now(),
            idempotency_key: Some("k".into()),
            request_hash: None,
        };
        let resp = TransferResponse::from(t);
        assert_eq!(resp.amount, "25.50");
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("idempotency_key").is_none());
    }
}
