//! Transfer request types

use rust_decimal::Decimal;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::core_types::AccountId;
use crate::error::{ServiceError, ServiceResult};
use crate::money::{canonical_amount, check_amount};

/// Upper bound on client idempotency keys (`transfers_tb.idempotency_key`)
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// A requested money movement, not yet validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCommand {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Option<Decimal>,
    /// Set on the deduplicated path; stored on the transfer record
    pub idempotency: Option<IdempotencyTag>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyTag {
    pub key: String,
    pub request_hash: String,
}

impl TransferCommand {
    pub fn new(from: AccountId, to: AccountId, amount: Decimal) -> Self {
        Self {
            from,
            to,
            amount: Some(amount),
            idempotency: None,
        }
    }

    pub fn with_idempotency(mut self, key: impl Into<String>, request_hash: impl Into<String>) -> Self {
        self.idempotency = Some(IdempotencyTag {
            key: key.into(),
            request_hash: request_hash.into(),
        });
        self
    }

    /// Check everything that needs no lock; returns the amount to move.
    pub fn validate(&self) -> ServiceResult<Decimal> {
        if self.from == self.to {
            return Err(ServiceError::SameAccount);
        }
        let amount = self.amount.ok_or(ServiceError::AmountRequired)?;
        if amount <= Decimal::ZERO {
            return Err(ServiceError::InvalidAmount);
        }
        check_amount(amount)?;
        Ok(amount)
    }

    /// SHA-256 hex of the canonical payload.
    ///
    /// Keys are serialized in sorted order and the amount is normalized, so
    /// `10`, `10.0` and `10.00` give the same fingerprint.
    pub fn fingerprint(&self, amount: Decimal) -> String {
        // serde_json's default map is a BTreeMap, so keys come out sorted
        let payload = json!({
            "from_wallet_id": self.from,
            "to_wallet_id": self.to,
            "amount": canonical_amount(amount),
        });
        hex::encode(Sha256::digest(payload.to_string().as_bytes()))
    }
}

/// Reject blank or oversized idempotency keys.
pub fn validate_idempotency_key(key: &str) -> ServiceResult<&str> {
    let key = key.trim();
    if key.is_empty() {
        return Err(ServiceError::MissingIdempotencyKey);
    }
    if key.chars().count() > MAX_IDEMPOTENCY_KEY_LEN {
        return Err(ServiceError::IdempotencyKeyTooLong {
            max: MAX_IDEMPOTENCY_KEY_LEN,
        });
    }
    Ok(key)
}
