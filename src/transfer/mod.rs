//! Wallet Transfers
//!
//! # Layers
//!
//! ```text
//! TransferService::transfer_idempotent     reserve key → engine → resolve / release
//!   └─ TransferEngine::transfer_within     lock (ascending id) → mutate → record → hooks
//!        └─ TransactionScope / UnitOfWork  commit, then drain hooks
//! ```
//!
//! # Safety Invariants
//!
//! 1. **Lock order**: both wallet rows are locked in ascending id order, in one request
//! 2. **Check under lock**: funds are compared against the locked balance only
//! 3. **Reserve before lock**: the idempotency key is claimed before any row lock
//! 4. **Hooks after durability**: cache eviction and notification run after the outermost commit

pub mod engine;
pub mod service;
pub mod types;

pub use engine::{PostCommitEffects, TransferEngine};
pub use service::{TRANSFER_OPERATION, TransferService};
pub use types::{IdempotencyTag, MAX_IDEMPOTENCY_KEY_LEN, TransferCommand, validate_idempotency_key};
