//! Ledger store errors

use thiserror::Error;

use crate::core_types::AccountId;

/// Unique constraint on `transfers_tb.idempotency_key`
pub const IDEMPOTENCY_KEY_CONSTRAINT: &str = "transfers_tb_idempotency_key_key";

/// Unique constraint on `wallets_tb.user_id` (one wallet per owner)
pub const WALLET_OWNER_CONSTRAINT: &str = "wallets_tb_user_id_key";

/// Errors raised by a [`LedgerStore`](super::LedgerStore) backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Row lock wait exceeded the configured timeout (or the store broke a deadlock).
    /// Transient: the caller may retry, the engine never does.
    #[error("Lock wait timed out")]
    LockTimeout,

    #[error("Unique constraint violated: {constraint}")]
    Duplicate { constraint: String },

    #[error("Row {0} was not locked by this unit of work")]
    NotLocked(AccountId),

    #[error("No active savepoint")]
    NoSavepoint,

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Ledger store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl LedgerError {
    /// Whether a retry of the whole unit of work could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::LockTimeout | LedgerError::Unavailable(_))
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db_err) => match db_err.code().as_deref() {
                // lock_not_available (lock_timeout), deadlock_detected
                Some("55P03") | Some("40P01") => LedgerError::LockTimeout,
                Some("23505") => LedgerError::Duplicate {
                    constraint: db_err.constraint().unwrap_or("unknown").to_string(),
                },
                Some("23503") | Some("23514") => LedgerError::Constraint(db_err.message().to_string()),
                _ => LedgerError::Database(e.to_string()),
            },
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                LedgerError::Unavailable(e.to_string())
            }
            _ => LedgerError::Database(e.to_string()),
        }
    }
}
