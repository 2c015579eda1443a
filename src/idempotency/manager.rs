//! Idempotency Manager

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::store::IdempotencyStore;
use crate::config::IdempotencyConfig;
use crate::core_types::TransferId;
use crate::error::{ServiceError, ServiceResult};

/// Stored value of a reservation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub fingerprint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<TransferId>,
}

/// A key this caller holds exclusively until it resolves or releases it
#[derive(Debug)]
#[must_use = "a reservation must be resolved or released"]
pub struct Reservation {
    key: String,
    fingerprint: String,
}

impl Reservation {
    pub fn key(&self) -> &str {
        &self.key
    }
}

/// Outcome of [`IdempotencyManager::claim`]
#[derive(Debug)]
pub enum Claim {
    /// First sight of the key: run the operation
    Acquired(Reservation),
    /// Completed earlier with the same payload (replay mode only)
    Replay(TransferId),
}

/// Store key for `key` under `operation`: `idempotency:<operation>:<key>`
pub fn scoped_key(operation: &str, key: &str) -> String {
    format!("idempotency:{operation}:{key}")
}

pub struct IdempotencyManager {
    /// `None` when deduplication is disabled; every claim is then refused
    store: Option<Arc<dyn IdempotencyStore>>,
    pending_ttl: Duration,
    result_ttl: Duration,
    replay_completed: bool,
}

impl IdempotencyManager {
    pub fn new(store: Option<Arc<dyn IdempotencyStore>>, config: &IdempotencyConfig) -> Self {
        Self {
            store: if config.enabled { store } else { None },
            pending_ttl: config.pending_ttl(),
            result_ttl: config.result_ttl(),
            replay_completed: config.replay_completed,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    /// Reserve `key` for a request with `fingerprint`.
    ///
    /// # Errors
    /// - `IdempotencyConflict`: the key is held with a different fingerprint
    /// - `RequestInProgress`: the key is held with the same fingerprint, or
    ///   the store is disabled or failing
    pub async fn claim(
        &self,
        operation: &str,
        key: &str,
        fingerprint: &str,
    ) -> ServiceResult<Claim> {
        let Some(store) = &self.store else {
            warn!(key, "Idempotency store disabled, rejecting request");
            return Err(ServiceError::RequestInProgress);
        };
        let scoped = scoped_key(operation, key);
        let pending = encode(&IdempotencyRecord {
            fingerprint: fingerprint.to_string(),
            transfer_id: None,
        })?;

        let acquired = store
            .set_if_absent(&scoped, &pending, self.pending_ttl)
            .await
            .map_err(|e| {
                warn!(key = %scoped, error = %e, "Idempotency reservation failed, failing closed");
                ServiceError::RequestInProgress
            })?;

        if acquired {
            debug!(key = %scoped, "Idempotency key reserved");
            return Ok(Claim::Acquired(Reservation {
                key: scoped,
                fingerprint: fingerprint.to_string(),
            }));
        }

        let existing = store.get(&scoped).await.map_err(|e| {
            warn!(key = %scoped, error = %e, "Idempotency lookup failed, failing closed");
            ServiceError::RequestInProgress
        })?;

        // Expired or released between the two calls: still ambiguous, reject
        let Some(raw) = existing else {
            return Err(ServiceError::RequestInProgress);
        };

        let record = match serde_json::from_str::<IdempotencyRecord>(&raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(key = %scoped, error = %e, "Unreadable idempotency record");
                return Err(ServiceError::RequestInProgress);
            }
        };

        if record.fingerprint != fingerprint {
            debug!(key = %scoped, "Idempotency key reused with a different payload");
            return Err(ServiceError::IdempotencyConflict);
        }

        match record.transfer_id {
            Some(transfer_id) if self.replay_completed => {
                debug!(key = %scoped, transfer_id, "Replaying completed request");
                Ok(Claim::Replay(transfer_id))
            }
            _ => Err(ServiceError::RequestInProgress),
        }
    }

    /// Keep the reservation with the outcome, for `result_ttl`.
    ///
    /// The operation already committed, so a store failure here is only logged.
    pub async fn resolve(&self, reservation: Reservation, transfer_id: TransferId) {
        let Some(store) = &self.store else {
            return;
        };
        let record = IdempotencyRecord {
            fingerprint: reservation.fingerprint,
            transfer_id: Some(transfer_id),
        };
        let value = match encode(&record) {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %reservation.key, error = %e, "Idempotency record encoding failed");
                return;
            }
        };
        if let Err(e) = store.set(&reservation.key, &value, self.result_ttl).await {
            // The pending entry still blocks duplicates until it expires
            warn!(key = %reservation.key, transfer_id, error = %e, "Idempotency resolve failed");
        }
    }

    /// Drop the reservation so a retry with the same key can run.
    pub async fn release(&self, reservation: Reservation) {
        let Some(store) = &self.store else {
            return;
        };
        match store.delete(&reservation.key).await {
            Ok(()) => debug!(key = %reservation.key, "Idempotency reservation released"),
            Err(e) => warn!(key = %reservation.key, error = %e, "Idempotency release failed"),
        }
    }
}

fn encode(record: &IdempotencyRecord) -> ServiceResult<String> {
    serde_json::to_string(record).map_err(|e| ServiceError::Internal(e.to_string()))
}
