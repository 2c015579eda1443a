//! HTTP handlers
//!
//! Thin adapters: parse, call one service method, wrap the result.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};

use super::state::AppState;
use super::types::{
    ApiError, ApiResult, CreateTransferRequest, HealthResponse, HistoryQuery, TransferResponse,
    UserResponse, WalletResponse, ok,
};
use crate::core_types::{AccountId, TransferId, UserId};
use crate::error::ServiceError;
use crate::ledger::LedgerStore;
use crate::money::parse_amount;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Health check
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service up", body = HealthResponse, content_type = "application/json")
    ),
    tag = "System"
)]
pub async fn health_check() -> ApiResult<HealthResponse> {
    ok(HealthResponse {
        status: "ok".to_string(),
    })
}

/// Move money between two wallets, at most once per Idempotency-Key
#[utoipa::path(
    post,
    path = "/transfers",
    request_body = CreateTransferRequest,
    params(
        ("Idempotency-Key" = String, Header, description = "Client-chosen key, at most 255 characters")
    ),
    responses(
        (status = 200, description = "Transfer committed", body = TransferResponse),
        (status = 400, description = "Invalid request or key reused with different data"),
        (status = 404, description = "Wallet not found"),
        (status = 409, description = "Insufficient funds, or request in progress (also returned while storage is unreachable)"),
        (status = 422, description = "Idempotency-Key header missing"),
        (status = 503, description = "Lock timeout")
    ),
    tag = "Transfers"
)]
pub async fn create_transfer<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    Json(req): Json<CreateTransferRequest>,
) -> ApiResult<TransferResponse> {
    let key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .ok_or_else(|| ApiError::unprocessable("Idempotency-Key header is required"))?
        .to_str()
        .map_err(|_| ApiError::bad_request("Idempotency-Key must be visible ASCII"))?;

    let amount = req
        .amount
        .as_deref()
        .map(parse_amount)
        .transpose()
        .map_err(ServiceError::from)?;

    let transfer = state
        .transfers
        .transfer_idempotent(req.from_wallet_id, req.to_wallet_id, amount, key)
        .await?;
    ok(transfer.into())
}

#[utoipa::path(
    get,
    path = "/transfers/{id}",
    params(("id" = i64, Path, description = "Transfer ID")),
    responses(
        (status = 200, description = "Transfer", body = TransferResponse),
        (status = 404, description = "Transfer not found")
    ),
    tag = "Transfers"
)]
pub async fn get_transfer<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<TransferId>,
) -> ApiResult<TransferResponse> {
    let transfer = state.transfers.get_transfer(id).await?;
    ok(transfer.into())
}

/// Wallet balance, served from the read cache when enabled
#[utoipa::path(
    get,
    path = "/wallets/{id}",
    params(("id" = i64, Path, description = "Wallet ID")),
    responses(
        (status = 200, description = "Wallet", body = WalletResponse),
        (status = 404, description = "Wallet not found")
    ),
    tag = "Wallets"
)]
pub async fn get_wallet<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<AccountId>,
) -> ApiResult<WalletResponse> {
    let wallet = state.wallets.get_wallet(id).await?;
    ok(wallet.into())
}

/// Incoming and outgoing transfers of a wallet, newest first
#[utoipa::path(
    get,
    path = "/wallets/{id}/transfers",
    params(
        ("id" = i64, Path, description = "Wallet ID"),
        HistoryQuery
    ),
    responses(
        (status = 200, description = "Transfer history", body = Vec<TransferResponse>),
        (status = 404, description = "Wallet not found")
    ),
    tag = "Wallets"
)]
pub async fn get_wallet_transfers<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<AccountId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<TransferResponse>> {
    let transfers = state.accounts.list_transfers(id, query.limit).await?;
    ok(transfers.into_iter().map(TransferResponse::from).collect())
}

/// Create a user with a funded wallet
#[utoipa::path(
    post,
    path = "/users",
    responses(
        (status = 200, description = "User created", body = UserResponse),
        (status = 409, description = "Storage unreachable, retry later")
    ),
    tag = "Users"
)]
pub async fn create_user<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
) -> ApiResult<UserResponse> {
    let user = state.accounts.create_user().await?;
    ok(user.into())
}

#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User with wallet", body = UserResponse),
        (status = 404, description = "User not found")
    ),
    tag = "Users"
)]
pub async fn get_user<S: LedgerStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<UserId>,
) -> ApiResult<UserResponse> {
    let user = state.accounts.get_user(id).await?;
    ok(user.into())
}
