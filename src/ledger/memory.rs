//! In-memory ledger backend
//!
//! Mirrors the PostgreSQL semantics the engine relies on:
//! - one `tokio::sync::Mutex` per wallet row, held until commit/rollback/drop
//! - lock waits bounded by `lock_timeout`
//! - writes buffered per transaction and published atomically under a commit gate,
//!   so readers never observe a half-applied transfer
//! - savepoints snapshot the write buffer
//! - unique idempotency keys and one wallet per owner

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::error::{IDEMPOTENCY_KEY_CONSTRAINT, LedgerError, WALLET_OWNER_CONSTRAINT};
use super::models::{Account, NewTransfer, Transfer, User};
use super::{LedgerStore, LedgerTx, lock_sequence};
use crate::core_types::{AccountId, TransferId, UserId};

#[derive(Default)]
struct Tables {
    wallets: DashMap<AccountId, Account>,
    row_locks: DashMap<AccountId, Arc<Mutex<()>>>,
    owners: DashMap<UserId, AccountId>,
    users: DashMap<UserId, User>,
    transfers: RwLock<Vec<Transfer>>,
    idempotency_keys: DashMap<String, TransferId>,
    /// Writers publish under `write`, readers snapshot under `read`
    commit_gate: RwLock<()>,
    next_user_id: AtomicI64,
    next_account_id: AtomicI64,
    next_transfer_id: AtomicI64,
}

impl Tables {
    fn next_id(counter: &AtomicI64) -> i64 {
        counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// In-process [`LedgerStore`]
#[derive(Clone)]
pub struct MemoryLedger {
    tables: Arc<Tables>,
    lock_timeout: Duration,
}

impl MemoryLedger {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(Tables::default()),
            lock_timeout,
        }
    }

    /// Create a user and its wallet in one committed transaction.
    pub async fn seed_wallet(&self, balance: Decimal) -> Result<Account, LedgerError> {
        let mut tx = self.begin().await?;
        let user = tx.insert_user().await?;
        let account = tx.insert_account(user.id, balance).await?;
        tx.commit().await?;
        Ok(account)
    }

    /// Committed balances of all wallets, read atomically.
    pub fn balances(&self) -> BTreeMap<AccountId, Decimal> {
        let _gate = self
            .tables
            .commit_gate
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.tables
            .wallets
            .iter()
            .map(|entry| (*entry.key(), entry.value().balance))
            .collect()
    }

    /// Number of committed transfer records.
    pub fn transfer_count(&self) -> usize {
        self.tables
            .transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

/// Uncommitted writes of one transaction
#[derive(Debug, Clone, Default)]
struct WriteSet {
    balances: BTreeMap<AccountId, Decimal>,
    users: Vec<User>,
    wallets: Vec<Account>,
    transfers: Vec<Transfer>,
}

/// Open in-memory transaction
pub struct MemoryLedgerTx {
    tables: Arc<Tables>,
    lock_timeout: Duration,
    held: BTreeMap<AccountId, OwnedMutexGuard<()>>,
    writes: WriteSet,
    savepoints: Vec<WriteSet>,
}

impl MemoryLedgerTx {
    fn pending_wallet(&self, id: AccountId) -> Option<&Account> {
        self.writes.wallets.iter().find(|w| w.id == id)
    }

    fn committed_wallet(&self, id: AccountId) -> Option<Account> {
        let _gate = self
            .tables
            .commit_gate
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.tables.wallets.get(&id).map(|w| w.value().clone())
    }

    fn with_pending_balance(&self, mut account: Account) -> Account {
        if let Some(balance) = self.writes.balances.get(&account.id) {
            account.balance = *balance;
        }
        account
    }

    /// Publish the write set. Nothing is applied if a unique check fails.
    fn publish(self) -> Result<(), LedgerError> {
        let tables = &self.tables;
        let _gate = tables
            .commit_gate
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for transfer in &self.writes.transfers {
            if let Some(key) = &transfer.idempotency_key
                && tables.idempotency_keys.contains_key(key)
            {
                return Err(LedgerError::Duplicate {
                    constraint: IDEMPOTENCY_KEY_CONSTRAINT.to_string(),
                });
            }
        }
        for wallet in &self.writes.wallets {
            if tables.owners.contains_key(&wallet.user_id) {
                return Err(LedgerError::Duplicate {
                    constraint: WALLET_OWNER_CONSTRAINT.to_string(),
                });
            }
        }

        for user in &self.writes.users {
            tables.users.insert(user.id, user.clone());
        }
        for wallet in &self.writes.wallets {
            tables.owners.insert(wallet.user_id, wallet.id);
            tables
                .row_locks
                .insert(wallet.id, Arc::new(Mutex::new(())));
            tables.wallets.insert(wallet.id, wallet.clone());
        }
        for (id, balance) in &self.writes.balances {
            if let Some(mut wallet) = tables.wallets.get_mut(id) {
                wallet.balance = *balance;
            }
        }

        let mut transfers = tables
            .transfers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        for transfer in &self.writes.transfers {
            if let Some(key) = &transfer.idempotency_key {
                tables.idempotency_keys.insert(key.clone(), transfer.id);
            }
            transfers.push(transfer.clone());
        }

        // Row locks in `self.held` are released when `self` drops here
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    type Tx = MemoryLedgerTx;

    async fn begin(&self) -> Result<MemoryLedgerTx, LedgerError> {
        Ok(MemoryLedgerTx {
            tables: Arc::clone(&self.tables),
            lock_timeout: self.lock_timeout,
            held: BTreeMap::new(),
            writes: WriteSet::default(),
            savepoints: Vec::new(),
        })
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        let _gate = self
            .tables
            .commit_gate
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(self.tables.wallets.get(&id).map(|w| w.value().clone()))
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, LedgerError> {
        Ok(self.tables.users.get(&id).map(|u| u.value().clone()))
    }

    async fn get_account_by_owner(
        &self,
        user_id: UserId,
    ) -> Result<Option<Account>, LedgerError> {
        let _gate = self
            .tables
            .commit_gate
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let account = self
            .tables
            .owners
            .get(&user_id)
            .and_then(|id| self.tables.wallets.get(id.value()).map(|w| w.value().clone()));
        Ok(account)
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Option<Transfer>, LedgerError> {
        let transfers = self
            .tables
            .transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(transfers.iter().find(|t| t.id == id).cloned())
    }

    async fn list_transfers(
        &self,
        account_id: AccountId,
        limit: i64,
    ) -> Result<Vec<Transfer>, LedgerError> {
        let transfers = self
            .tables
            .transfers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut matching: Vec<Transfer> = transfers
            .iter()
            .filter(|t| t.from_wallet_id == account_id || t.to_wallet_id == account_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        matching.truncate(usize::try_from(limit.max(0)).unwrap_or(usize::MAX));
        Ok(matching)
    }
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn savepoint(&mut self) -> Result<(), LedgerError> {
        self.savepoints.push(self.writes.clone());
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), LedgerError> {
        self.savepoints.pop().ok_or(LedgerError::NoSavepoint)?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), LedgerError> {
        self.writes = self.savepoints.pop().ok_or(LedgerError::NoSavepoint)?;
        Ok(())
    }

    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<Account>, LedgerError> {
        let mut rows = Vec::with_capacity(ids.len());

        for id in lock_sequence(ids) {
            if let Some(pending) = self.pending_wallet(id) {
                let pending = pending.clone();
                rows.push(self.with_pending_balance(pending));
                continue;
            }

            let Some(row_lock) = self.tables.row_locks.get(&id).map(|l| Arc::clone(l.value()))
            else {
                continue;
            };

            if !self.held.contains_key(&id) {
                let guard = tokio::time::timeout(self.lock_timeout, row_lock.lock_owned())
                    .await
                    .map_err(|_| LedgerError::LockTimeout)?;
                self.held.insert(id, guard);
            }

            // Read after the lock so the row reflects the previous holder's commit
            if let Some(account) = self.committed_wallet(id) {
                rows.push(self.with_pending_balance(account));
            }
        }

        Ok(rows)
    }

    async fn set_balance(&mut self, id: AccountId, balance: Decimal) -> Result<(), LedgerError> {
        if let Some(pending) = self.writes.wallets.iter_mut().find(|w| w.id == id) {
            pending.balance = balance;
            return Ok(());
        }
        if !self.held.contains_key(&id) {
            return Err(LedgerError::NotLocked(id));
        }
        self.writes.balances.insert(id, balance);
        Ok(())
    }

    async fn insert_transfer(&mut self, new: NewTransfer) -> Result<Transfer, LedgerError> {
        if new.from_wallet_id == new.to_wallet_id {
            return Err(LedgerError::Constraint(
                "ck_transfers_wallets_not_same".to_string(),
            ));
        }
        if let Some(key) = &new.idempotency_key {
            let taken = self.tables.idempotency_keys.contains_key(key)
                || self
                    .writes
                    .transfers
                    .iter()
                    .any(|t| t.idempotency_key.as_ref() == Some(key));
            if taken {
                return Err(LedgerError::Duplicate {
                    constraint: IDEMPOTENCY_KEY_CONSTRAINT.to_string(),
                });
            }
        }

        let transfer = Transfer {
            id: Tables::next_id(&self.tables.next_transfer_id),
            from_wallet_id: new.from_wallet_id,
            to_wallet_id: new.to_wallet_id,
            amount: new.amount,
            created_at: Utc::now(),
            idempotency_key: new.idempotency_key,
            request_hash: new.request_hash,
        };
        self.writes.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn insert_user(&mut self) -> Result<User, LedgerError> {
        let user = User {
            id: Tables::next_id(&self.tables.next_user_id),
            created_at: Utc::now(),
        };
        self.writes.users.push(user.clone());
        Ok(user)
    }

    async fn insert_account(
        &mut self,
        user_id: UserId,
        balance: Decimal,
    ) -> Result<Account, LedgerError> {
        let user_exists = self.tables.users.contains_key(&user_id)
            || self.writes.users.iter().any(|u| u.id == user_id);
        if !user_exists {
            return Err(LedgerError::Constraint(format!(
                "wallets_tb_user_id_fkey: user {user_id} does not exist"
            )));
        }
        let owner_taken = self.tables.owners.contains_key(&user_id)
            || self.writes.wallets.iter().any(|w| w.user_id == user_id);
        if owner_taken {
            return Err(LedgerError::Duplicate {
                constraint: WALLET_OWNER_CONSTRAINT.to_string(),
            });
        }

        let account = Account {
            id: Tables::next_id(&self.tables.next_account_id),
            balance,
            user_id,
        };
        self.writes.wallets.push(account.clone());
        Ok(account)
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.publish()
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        // Dropping the write set and the held guards is the rollback
        Ok(())
    }
}
