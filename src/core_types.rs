//! Core types used throughout the system
//!
//! Identifiers are `i64` because they are PostgreSQL `BIGSERIAL` keys.

/// Wallet (account) ID - assigned by the ledger store, immutable.
///
/// # Ordering:
/// Row locks are always taken in ascending `AccountId` order, so this
/// type's `Ord` is part of the deadlock-avoidance contract.
pub type AccountId = i64;

/// User ID - owner of exactly one wallet.
pub type UserId = i64;

/// Transfer ID - assigned when the transfer record is inserted.
pub type TransferId = i64;

/// Which side of a transfer an account sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountSide {
    Source,
    Destination,
}

impl AccountSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountSide::Source => "source",
            AccountSide::Destination => "destination",
        }
    }
}

impl std::fmt::Display for AccountSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Return `(a, b)` in the order their row locks must be acquired.
#[inline]
pub fn lock_order(a: AccountId, b: AccountId) -> [AccountId; 2] {
    if a <= b { [a, b] } else { [b, a] }
}
