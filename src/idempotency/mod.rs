//! Request Deduplication
//!
//! A client-supplied key is reserved in an [`IdempotencyStore`] before any
//! wallet lock is taken. The [`IdempotencyManager`] owns the protocol:
//!
//! ```text
//! set_if_absent(idempotency:transfer:<key>, {fingerprint}, pending_ttl)
//!   ├─ acquired → run transfer
//!   │     ├─ Ok  → set(key, {fingerprint, transfer_id}, result_ttl)
//!   │     └─ Err → delete(key)          (a legitimate retry may proceed)
//!   └─ present  → get(key)
//!         ├─ fingerprint differs → IdempotencyConflict
//!         └─ fingerprint matches → RequestInProgress
//! ```
//!
//! Every ambiguity (store disabled, store error, record vanished between
//! the two calls) is answered with `RequestInProgress`: the manager fails
//! closed and never lets a possible duplicate through.

pub mod manager;
pub mod postgres;
pub mod store;

pub use manager::{Claim, IdempotencyManager, IdempotencyRecord, Reservation, scoped_key};
pub use postgres::PgIdempotencyStore;
pub use store::{IdempotencyStore, IdempotencyStoreError, MemoryIdempotencyStore};
