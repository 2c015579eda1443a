//! Service Error Types
//!
//! One tagged enum for everything a caller of the transfer, account or
//! wallet services can see. Each variant has a stable `code()`, an
//! [`ErrorKind`] the client can use to decide whether to retry, and an
//! HTTP status suggestion for the gateway.

use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

use crate::core_types::{AccountId, AccountSide, TransferId, UserId};
use crate::ledger::{IDEMPOTENCY_KEY_CONSTRAINT, LedgerError};
use crate::money::MoneyError;

/// Error category, stable across variants
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed client input, never retried
    InvalidRequest,
    /// Referenced entity absent
    NotFound,
    /// Business rule rejected the request as-is
    Conflict,
    /// Transient, safe to retry later
    RequestInProgress,
    /// A backing store could not be reached
    StorageUnavailable,
}

impl ErrorKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::RequestInProgress | ErrorKind::StorageUnavailable
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    // === Validation Errors ===
    #[error("Source and destination wallet cannot be the same")]
    SameAccount,

    #[error("Amount is required")]
    AmountRequired,

    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Invalid amount format: {0}")]
    InvalidAmountFormat(String),

    #[error("Amount precision exceeds {max} decimal places")]
    AmountPrecision { max: u32 },

    #[error("Amount is too large")]
    AmountTooLarge,

    #[error("Idempotency-Key must not be empty")]
    MissingIdempotencyKey,

    #[error("Idempotency-Key longer than {max} characters")]
    IdempotencyKeyTooLong { max: usize },

    // === Lookup Errors ===
    #[error("{side} wallet {id} not found")]
    AccountNotFound { id: AccountId, side: AccountSide },

    #[error("Wallet {0} not found")]
    WalletNotFound(AccountId),

    #[error("User {0} not found")]
    UserNotFound(UserId),

    #[error("Transfer {0} not found")]
    TransferNotFound(TransferId),

    // === Business Conflicts ===
    #[error("Insufficient funds in wallet {account_id}: available {available}, requested {requested}")]
    InsufficientFunds {
        account_id: AccountId,
        available: Decimal,
        requested: Decimal,
    },

    #[error("Balance of wallet {0} would overflow")]
    BalanceOverflow(AccountId),

    #[error("Idempotency-Key reuse with different request data")]
    IdempotencyConflict,

    // === Transient ===
    #[error("A request is already in progress")]
    RequestInProgress,

    #[error("Timed out waiting for a wallet lock")]
    LockTimeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::SameAccount
            | ServiceError::AmountRequired
            | ServiceError::InvalidAmount
            | ServiceError::InvalidAmountFormat(_)
            | ServiceError::AmountPrecision { .. }
            | ServiceError::AmountTooLarge
            | ServiceError::MissingIdempotencyKey
            | ServiceError::IdempotencyKeyTooLong { .. } => ErrorKind::InvalidRequest,
            ServiceError::AccountNotFound { .. }
            | ServiceError::WalletNotFound(_)
            | ServiceError::UserNotFound(_)
            | ServiceError::TransferNotFound(_) => ErrorKind::NotFound,
            ServiceError::InsufficientFunds { .. }
            | ServiceError::BalanceOverflow(_)
            | ServiceError::IdempotencyConflict => ErrorKind::Conflict,
            ServiceError::RequestInProgress => ErrorKind::RequestInProgress,
            ServiceError::LockTimeout | ServiceError::Internal(_) => ErrorKind::StorageUnavailable,
        }
    }

    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::SameAccount => "SAME_WALLET",
            ServiceError::AmountRequired => "AMOUNT_REQUIRED",
            ServiceError::InvalidAmount => "INVALID_AMOUNT",
            ServiceError::InvalidAmountFormat(_) => "INVALID_AMOUNT_FORMAT",
            ServiceError::AmountPrecision { .. } => "PRECISION_OVERFLOW",
            ServiceError::AmountTooLarge => "AMOUNT_TOO_LARGE",
            ServiceError::MissingIdempotencyKey => "MISSING_IDEMPOTENCY_KEY",
            ServiceError::IdempotencyKeyTooLong { .. } => "IDEMPOTENCY_KEY_TOO_LONG",
            ServiceError::AccountNotFound {
                side: AccountSide::Source,
                ..
            } => "SOURCE_WALLET_NOT_FOUND",
            ServiceError::AccountNotFound {
                side: AccountSide::Destination,
                ..
            } => "DESTINATION_WALLET_NOT_FOUND",
            ServiceError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            ServiceError::UserNotFound(_) => "USER_NOT_FOUND",
            ServiceError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            ServiceError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            ServiceError::BalanceOverflow(_) => "BALANCE_OVERFLOW",
            ServiceError::IdempotencyConflict => "IDEMPOTENCY_CONFLICT",
            ServiceError::RequestInProgress => "REQUEST_IN_PROGRESS",
            ServiceError::LockTimeout => "LOCK_TIMEOUT",
            ServiceError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            // Key reuse is a client mistake, not a state conflict
            ServiceError::IdempotencyConflict => 400,
            ServiceError::Internal(_) => 500,
            _ => match self.kind() {
                ErrorKind::InvalidRequest => 400,
                ErrorKind::NotFound => 404,
                ErrorKind::Conflict | ErrorKind::RequestInProgress => 409,
                ErrorKind::StorageUnavailable => 503,
            },
        }
    }
}

impl From<MoneyError> for ServiceError {
    fn from(e: MoneyError) -> Self {
        match e {
            MoneyError::InvalidFormat(msg) => ServiceError::InvalidAmountFormat(msg),
            MoneyError::PrecisionOverflow { max, .. } => ServiceError::AmountPrecision { max },
            MoneyError::Overflow => ServiceError::AmountTooLarge,
        }
    }
}

impl From<LedgerError> for ServiceError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::LockTimeout => ServiceError::LockTimeout,
            // A second insert for the same key lost the race to the first
            LedgerError::Duplicate { constraint } if constraint == IDEMPOTENCY_KEY_CONSTRAINT => {
                ServiceError::RequestInProgress
            }
            // Unreachable store: the client retries as if the request were still running
            LedgerError::Unavailable(detail) => {
                warn!(error = %detail, "Ledger unavailable");
                ServiceError::RequestInProgress
            }
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ServiceError::SameAccount.code(), "SAME_WALLET");
        assert_eq!(
            ServiceError::AccountNotFound {
                id: 3,
                side: AccountSide::Destination
            }
            .code(),
            "DESTINATION_WALLET_NOT_FOUND"
        );
        assert_eq!(ServiceError::RequestInProgress.code(), "REQUEST_IN_PROGRESS");
    }

    #[test]
    fn test_http_status() {
        assert_eq!(ServiceError::InvalidAmount.http_status(), 400);
        assert_eq!(ServiceError::IdempotencyConflict.http_status(), 400);
        assert_eq!(ServiceError::TransferNotFound(1).http_status(), 404);
        assert_eq!(
            ServiceError::InsufficientFunds {
                account_id: 1,
                available: Decimal::ZERO,
                requested: Decimal::ONE
            }
            .http_status(),
            409
        );
        assert_eq!(ServiceError::RequestInProgress.http_status(), 409);
        assert_eq!(ServiceError::LockTimeout.http_status(), 503);
        assert_eq!(ServiceError::Internal("x".into()).http_status(), 500);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            ServiceError::AccountNotFound {
                id: 1,
                side: AccountSide::Source
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(ServiceError::IdempotencyConflict.kind(), ErrorKind::Conflict);
        assert!(ServiceError::LockTimeout.kind().is_retryable());
        assert!(!ServiceError::SameAccount.kind().is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ServiceError::AccountNotFound {
            id: 42,
            side: AccountSide::Source,
        };
        assert_eq!(err.to_string(), "source wallet 42 not found");
    }

    #[test]
    fn test_ledger_error_mapping() {
        assert_eq!(
            ServiceError::from(LedgerError::LockTimeout),
            ServiceError::LockTimeout
        );
        assert_eq!(
            ServiceError::from(LedgerError::Duplicate {
                constraint: IDEMPOTENCY_KEY_CONSTRAINT.into()
            }),
            ServiceError::RequestInProgress
        );
        let err = ServiceError::from(LedgerError::Unavailable("pool timed out".into()));
        assert_eq!(err, ServiceError::RequestInProgress);
        assert_eq!(err.http_status(), 409);
        assert!(err.kind().is_retryable());
    }

    #[test]
    fn test_money_error_mapping() {
        assert_eq!(
            ServiceError::from(MoneyError::PrecisionOverflow {
                provided: 3,
                max: 2
            }),
            ServiceError::AmountPrecision { max: 2 }
        );
        assert_eq!(
            ServiceError::from(MoneyError::Overflow),
            ServiceError::AmountTooLarge
        );
    }
}
