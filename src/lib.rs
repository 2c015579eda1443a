//! Wallet Transfer - exactly-once money movement between wallets
//!
//! # Modules
//!
//! - [`core_types`] - Identifiers and lock ordering
//! - [`money`] - Decimal parsing, precision and formatting
//! - [`ledger`] - Wallet and transfer storage (PostgreSQL, in-memory)
//! - [`unit_of_work`] - Transactions, savepoints and commit hooks
//! - [`transfer`] - Transfer engine and idempotent transfer service
//! - [`idempotency`] - Fail-closed request deduplication
//! - [`cache`] - Read-through wallet cache
//! - [`notify`] - Post-commit notification queue and worker
//! - [`account`] - Users and their wallets
//! - [`gateway`] - HTTP API
//! - [`config`] / [`logging`] / [`db`] - Process plumbing

// Core types - must be first!
pub mod core_types;

pub mod error;
pub mod money;

// Storage
pub mod db;
pub mod idempotency;
pub mod ledger;
pub mod unit_of_work;

// Services
pub mod account;
pub mod cache;
pub mod notify;
pub mod transfer;

// Process
pub mod config;
pub mod gateway;
pub mod logging;

// Convenient re-exports at crate root
pub use core_types::{AccountId, TransferId, UserId};
pub use error::{ErrorKind, ServiceError, ServiceResult};
pub use ledger::{LedgerStore, MemoryLedger, PgLedger};
pub use transfer::{TransferCommand, TransferEngine, TransferService};
pub use unit_of_work::{TransactionScope, UnitOfWork};
