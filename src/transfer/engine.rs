//! Transfer Engine
//!
//! Moves money between two wallets inside one unit of work:
//!
//! 1. validate (no lock, no transaction)
//! 2. lock both rows in ascending id order
//! 3. re-check funds against the locked balance
//! 4. debit, credit, insert the immutable transfer record
//! 5. register post-commit hooks: evict both cached wallets, enqueue a notification
//!
//! Any error from step 2 on unwinds the unit of work; the hooks only run
//! once the outermost commit succeeded.

use futures::FutureExt;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use super::types::TransferCommand;
use crate::cache::WalletReader;
use crate::core_types::{AccountId, AccountSide, lock_order};
use crate::error::{ServiceError, ServiceResult};
use crate::ledger::{Account, LedgerStore, LedgerTx, NewTransfer, Transfer};
use crate::money::max_amount;
use crate::notify::Notifier;
use crate::unit_of_work::{TransactionScope, UnitOfWork};

/// Collaborators invoked from commit hooks
pub struct PostCommitEffects<S: LedgerStore> {
    pub wallets: Arc<WalletReader<S>>,
    pub notifier: Arc<dyn Notifier>,
}

impl<S: LedgerStore> Clone for PostCommitEffects<S> {
    fn clone(&self) -> Self {
        Self {
            wallets: Arc::clone(&self.wallets),
            notifier: Arc::clone(&self.notifier),
        }
    }
}

pub struct TransferEngine<S: LedgerStore> {
    scope: TransactionScope<S>,
    effects: PostCommitEffects<S>,
}

impl<S: LedgerStore> TransferEngine<S> {
    pub fn new(scope: TransactionScope<S>, effects: PostCommitEffects<S>) -> Self {
        Self { scope, effects }
    }

    pub fn scope(&self) -> &TransactionScope<S> {
        &self.scope
    }

    /// Run a transfer as its own outermost unit of work.
    pub async fn transfer(&self, cmd: TransferCommand) -> ServiceResult<Transfer> {
        self.transfer_within(None, cmd).await
    }

    /// Run a transfer inside `parent` (as a savepoint) or as a new outermost unit.
    ///
    /// Nested, its hooks fire when the caller's outermost unit commits.
    pub async fn transfer_within(
        &self,
        parent: Option<&mut UnitOfWork<S::Tx>>,
        cmd: TransferCommand,
    ) -> ServiceResult<Transfer> {
        let amount = cmd.validate()?;
        let effects = self.effects.clone();
        let nested = parent.is_some();
        let started = Instant::now();

        let transfer = self
            .scope
            .within(parent, move |uow| {
                async move { apply(uow, &cmd, amount, &effects).await }.boxed()
            })
            .await?;

        let elapsed_us = started.elapsed().as_micros() as u64;
        if nested {
            // Savepoint released only; the caller's unit may still roll back
            debug!(
                transfer_id = transfer.id,
                from = transfer.from_wallet_id,
                to = transfer.to_wallet_id,
                amount = %transfer.amount,
                elapsed_us,
                "Transfer applied"
            );
        } else {
            info!(
                transfer_id = transfer.id,
                from = transfer.from_wallet_id,
                to = transfer.to_wallet_id,
                amount = %transfer.amount,
                elapsed_us,
                "Transfer committed"
            );
        }
        Ok(transfer)
    }
}

/// The locked critical section.
async fn apply<S: LedgerStore>(
    uow: &mut UnitOfWork<S::Tx>,
    cmd: &TransferCommand,
    amount: Decimal,
    effects: &PostCommitEffects<S>,
) -> ServiceResult<Transfer> {
    let (from, to) = (cmd.from, cmd.to);

    let rows = uow.tx().lock_accounts(&lock_order(from, to)).await?;
    let source = find_locked(&rows, from, AccountSide::Source)?;
    let destination = find_locked(&rows, to, AccountSide::Destination)?;

    // Only the locked balance counts
    if source.balance < amount {
        debug!(from, available = %source.balance, requested = %amount, "Insufficient funds");
        return Err(ServiceError::InsufficientFunds {
            account_id: from,
            available: source.balance,
            requested: amount,
        });
    }

    let source_after = source
        .balance
        .checked_sub(amount)
        .ok_or(ServiceError::BalanceOverflow(from))?;
    let destination_after = destination
        .balance
        .checked_add(amount)
        .filter(|b| *b <= max_amount())
        .ok_or(ServiceError::BalanceOverflow(to))?;

    uow.tx().set_balance(from, source_after).await?;
    uow.tx().set_balance(to, destination_after).await?;

    let (idempotency_key, request_hash) = match &cmd.idempotency {
        Some(tag) => (Some(tag.key.clone()), Some(tag.request_hash.clone())),
        None => (None, None),
    };
    let transfer = uow
        .tx()
        .insert_transfer(NewTransfer {
            from_wallet_id: from,
            to_wallet_id: to,
            amount,
            idempotency_key,
            request_hash,
        })
        .await?;

    for wallet_id in [from, to] {
        let wallets = Arc::clone(&effects.wallets);
        uow.on_commit("invalidate_wallet_cache", move || async move {
            wallets
                .evict(wallet_id)
                .await
                .map_err(anyhow::Error::from)
        });
    }

    let notifier = Arc::clone(&effects.notifier);
    let transfer_id = transfer.id;
    uow.on_commit("enqueue_notification", move || async move {
        notifier
            .enqueue(transfer_id)
            .await
            .map_err(anyhow::Error::from)
    });

    Ok(transfer)
}

fn find_locked(rows: &[Account], id: AccountId, side: AccountSide) -> ServiceResult<Account> {
    rows.iter()
        .find(|a| a.id == id)
        .cloned()
        .ok_or(ServiceError::AccountNotFound { id, side })
}
