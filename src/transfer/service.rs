//! Deduplicated transfer entry point

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

use super::engine::TransferEngine;
use super::types::{TransferCommand, validate_idempotency_key};
use crate::core_types::{AccountId, TransferId};
use crate::error::{ServiceError, ServiceResult};
use crate::idempotency::{Claim, IdempotencyManager};
use crate::ledger::{LedgerStore, Transfer};

/// Operation name in idempotency store keys
pub const TRANSFER_OPERATION: &str = "transfer";

pub struct TransferService<S: LedgerStore> {
    engine: Arc<TransferEngine<S>>,
    idempotency: Arc<IdempotencyManager>,
    store: Arc<S>,
}

impl<S: LedgerStore> TransferService<S> {
    pub fn new(
        engine: Arc<TransferEngine<S>>,
        idempotency: Arc<IdempotencyManager>,
        store: Arc<S>,
    ) -> Self {
        Self {
            engine,
            idempotency,
            store,
        }
    }

    pub fn engine(&self) -> &Arc<TransferEngine<S>> {
        &self.engine
    }

    /// Transfer at most once per `key`.
    ///
    /// The reservation is taken before any wallet lock, so a blocked
    /// duplicate never contends for account rows.
    pub async fn transfer_idempotent(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Option<Decimal>,
        key: &str,
    ) -> ServiceResult<Transfer> {
        let key = validate_idempotency_key(key)?;
        let cmd = TransferCommand {
            from,
            to,
            amount,
            idempotency: None,
        };
        let amount = cmd.validate()?;
        let fingerprint = cmd.fingerprint(amount);

        let reservation = match self
            .idempotency
            .claim(TRANSFER_OPERATION, key, &fingerprint)
            .await?
        {
            Claim::Acquired(reservation) => reservation,
            Claim::Replay(transfer_id) => return self.replay(transfer_id, key).await,
        };

        let cmd = cmd.with_idempotency(key, fingerprint);
        match self.engine.transfer(cmd).await {
            Ok(transfer) => {
                self.idempotency.resolve(reservation, transfer.id).await;
                Ok(transfer)
            }
            Err(e) => {
                self.idempotency.release(reservation).await;
                Err(e)
            }
        }
    }

    async fn replay(&self, transfer_id: TransferId, key: &str) -> ServiceResult<Transfer> {
        match self.store.get_transfer(transfer_id).await? {
            Some(transfer) => {
                info!(transfer_id, key, "Returning recorded transfer for repeated key");
                Ok(transfer)
            }
            None => {
                warn!(transfer_id, key, "Idempotency record points at a missing transfer");
                Err(ServiceError::RequestInProgress)
            }
        }
    }

    pub async fn get_transfer(&self, id: TransferId) -> ServiceResult<Transfer> {
        self.store
            .get_transfer(id)
            .await?
            .ok_or(ServiceError::TransferNotFound(id))
    }
}
