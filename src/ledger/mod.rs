//! Ledger Store
//!
//! Durable table of wallets and immutable transfer records.
//!
//! # Contract
//!
//! The transfer engine only needs a handful of primitives:
//! - **begin / commit / rollback** of an atomic unit
//! - **savepoints** for nested sub-units
//! - **load-for-update**: pessimistic row locks, always taken in ascending id order
//! - **insert** of immutable transfer rows
//!
//! Two backends implement it:
//! - [`PgLedger`]: PostgreSQL via `sqlx` (`SELECT ... FOR UPDATE`, `SAVEPOINT`)
//! - [`MemoryLedger`]: in-process, tokio mutex per row (tests, `database.backend: memory`)

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;

pub use error::{IDEMPOTENCY_KEY_CONSTRAINT, LedgerError, WALLET_OWNER_CONSTRAINT};
pub use memory::MemoryLedger;
pub use models::{Account, NewTransfer, Transfer, User};
pub use postgres::PgLedger;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::core_types::{AccountId, TransferId, UserId};

/// A durable ledger backend.
///
/// Read methods run outside any unit of work and see committed data only.
#[async_trait]
pub trait LedgerStore: Send + Sync + 'static {
    type Tx: LedgerTx + 'static;

    /// Begin an outermost transaction.
    async fn begin(&self) -> Result<Self::Tx, LedgerError>;

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError>;

    async fn get_user(&self, id: UserId) -> Result<Option<User>, LedgerError>;

    async fn get_account_by_owner(&self, user_id: UserId)
    -> Result<Option<Account>, LedgerError>;

    async fn get_transfer(&self, id: TransferId) -> Result<Option<Transfer>, LedgerError>;

    /// Incoming and outgoing transfers of a wallet, newest first.
    async fn list_transfers(
        &self,
        account_id: AccountId,
        limit: i64,
    ) -> Result<Vec<Transfer>, LedgerError>;
}

/// An open transaction on a [`LedgerStore`].
///
/// Dropping it without `commit` rolls everything back and releases all row locks.
#[async_trait]
pub trait LedgerTx: Send {
    /// Open a nested savepoint.
    async fn savepoint(&mut self) -> Result<(), LedgerError>;

    /// Keep the work of the innermost savepoint.
    async fn release_savepoint(&mut self) -> Result<(), LedgerError>;

    /// Undo the work of the innermost savepoint.
    async fn rollback_to_savepoint(&mut self) -> Result<(), LedgerError>;

    /// Lock the given wallet rows in ascending id order and return the ones that exist.
    ///
    /// Blocks while another transaction holds any of the rows; fails with
    /// [`LedgerError::LockTimeout`] when the wait exceeds the store's timeout.
    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<Account>, LedgerError>;

    /// Overwrite the balance of a row locked by this transaction.
    async fn set_balance(&mut self, id: AccountId, balance: Decimal) -> Result<(), LedgerError>;

    async fn insert_transfer(&mut self, new: NewTransfer) -> Result<Transfer, LedgerError>;

    async fn insert_user(&mut self) -> Result<User, LedgerError>;

    async fn insert_account(
        &mut self,
        user_id: UserId,
        balance: Decimal,
    ) -> Result<Account, LedgerError>;

    async fn commit(self) -> Result<(), LedgerError>;

    async fn rollback(self) -> Result<(), LedgerError>;
}

/// Sort and dedup ids into lock acquisition order.
pub(crate) fn lock_sequence(ids: &[AccountId]) -> Vec<AccountId> {
    let mut ordered = ids.to_vec();
    ordered.sort_unstable();
    ordered.dedup();
    ordered
}
