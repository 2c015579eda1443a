//! Ledger row types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

use crate::core_types::{AccountId, TransferId, UserId};

/// Wallet row (`wallets_tb`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Account {
    pub id: AccountId,
    pub balance: Decimal,
    pub user_id: UserId,
}

/// User row (`users_tb`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct User {
    pub id: UserId,
    pub created_at: DateTime<Utc>,
}

/// Immutable ledger entry (`transfers_tb`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Transfer {
    pub id: TransferId,
    pub from_wallet_id: AccountId,
    pub to_wallet_id: AccountId,
    pub amount: Decimal,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_hash: Option<String>,
}

/// Insert payload for a transfer record; `id` and `created_at` come from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransfer {
    pub from_wallet_id: AccountId,
    pub to_wallet_id: AccountId,
    pub amount: Decimal,
    pub idempotency_key: Option<String>,
    pub request_hash: Option<String>,
}
