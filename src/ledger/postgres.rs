//! PostgreSQL ledger backend
//!
//! Row locks are `SELECT ... FOR UPDATE` with `ORDER BY id`, so two transfers
//! over the same pair of wallets queue on the lower id instead of
//! deadlocking. `lock_timeout` is set per transaction with `SET LOCAL`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

use super::error::LedgerError;
use super::models::{Account, NewTransfer, Transfer, User};
use super::{LedgerStore, LedgerTx, lock_sequence};
use crate::core_types::{AccountId, TransferId, UserId};

const LOCK_ACCOUNTS_SQL: &str = "SELECT id, balance, user_id FROM wallets_tb \
     WHERE id = ANY($1) ORDER BY id FOR UPDATE";

const SELECT_TRANSFER_SQL: &str = "SELECT id, from_wallet_id, to_wallet_id, amount, created_at, \
     idempotency_key, request_hash FROM transfers_tb";

/// PostgreSQL-backed [`LedgerStore`]
#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PgLedger {
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Open PostgreSQL transaction plus its savepoint depth
pub struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
    savepoints: usize,
}

#[async_trait]
impl LedgerStore for PgLedger {
    type Tx = PgLedgerTx;

    async fn begin(&self) -> Result<PgLedgerTx, LedgerError> {
        let mut tx = self.pool.begin().await?;

        // SET LOCAL does not accept bind parameters
        let set_timeout = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout.as_millis()
        );
        sqlx::query(&set_timeout).execute(&mut *tx).await?;

        Ok(PgLedgerTx { tx, savepoints: 0 })
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, LedgerError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, balance, user_id FROM wallets_tb WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn get_user(&self, id: UserId) -> Result<Option<User>, LedgerError> {
        let user = sqlx::query_as::<_, User>("SELECT id, created_at FROM users_tb WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    async fn get_account_by_owner(
        &self,
        user_id: UserId,
    ) -> Result<Option<Account>, LedgerError> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, balance, user_id FROM wallets_tb WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn get_transfer(&self, id: TransferId) -> Result<Option<Transfer>, LedgerError> {
        let sql = format!("{SELECT_TRANSFER_SQL} WHERE id = $1");
        let transfer = sqlx::query_as::<_, Transfer>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(transfer)
    }

    async fn list_transfers(
        &self,
        account_id: AccountId,
        limit: i64,
    ) -> Result<Vec<Transfer>, LedgerError> {
        let sql = format!(
            "{SELECT_TRANSFER_SQL} WHERE from_wallet_id = $1 OR to_wallet_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2"
        );
        let transfers = sqlx::query_as::<_, Transfer>(&sql)
            .bind(account_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(transfers)
    }
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn savepoint(&mut self) -> Result<(), LedgerError> {
        let name = self.savepoints + 1;
        sqlx::query(&format!("SAVEPOINT sp_{name}"))
            .execute(&mut *self.tx)
            .await?;
        self.savepoints = name;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), LedgerError> {
        if self.savepoints == 0 {
            return Err(LedgerError::NoSavepoint);
        }
        sqlx::query(&format!("RELEASE SAVEPOINT sp_{}", self.savepoints))
            .execute(&mut *self.tx)
            .await?;
        self.savepoints -= 1;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), LedgerError> {
        if self.savepoints == 0 {
            return Err(LedgerError::NoSavepoint);
        }
        let name = self.savepoints;
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT sp_{name}"))
            .execute(&mut *self.tx)
            .await?;
        sqlx::query(&format!("RELEASE SAVEPOINT sp_{name}"))
            .execute(&mut *self.tx)
            .await?;
        self.savepoints -= 1;
        Ok(())
    }

    async fn lock_accounts(&mut self, ids: &[AccountId]) -> Result<Vec<Account>, LedgerError> {
        let ordered = lock_sequence(ids);
        let rows = sqlx::query_as::<_, Account>(LOCK_ACCOUNTS_SQL)
            .bind(ordered)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows)
    }

    async fn set_balance(&mut self, id: AccountId, balance: Decimal) -> Result<(), LedgerError> {
        let result = sqlx::query("UPDATE wallets_tb SET balance = $1 WHERE id = $2")
            .bind(balance)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(LedgerError::NotLocked(id));
        }
        Ok(())
    }

    async fn insert_transfer(&mut self, new: NewTransfer) -> Result<Transfer, LedgerError> {
        let transfer = sqlx::query_as::<_, Transfer>(
            "INSERT INTO transfers_tb \
                (from_wallet_id, to_wallet_id, amount, idempotency_key, request_hash) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING id, from_wallet_id, to_wallet_id, amount, created_at, \
                       idempotency_key, request_hash",
        )
        .bind(new.from_wallet_id)
        .bind(new.to_wallet_id)
        .bind(new.amount)
        .bind(new.idempotency_key)
        .bind(new.request_hash)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(transfer)
    }

    async fn insert_user(&mut self) -> Result<User, LedgerError> {
        let user = sqlx::query_as::<_, User>(
            "INSERT INTO users_tb DEFAULT VALUES RETURNING id, created_at",
        )
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(user)
    }

    async fn insert_account(
        &mut self,
        user_id: UserId,
        balance: Decimal,
    ) -> Result<Account, LedgerError> {
        let account = sqlx::query_as::<_, Account>(
            "INSERT INTO wallets_tb (user_id, balance) VALUES ($1, $2) \
             RETURNING id, balance, user_id",
        )
        .bind(user_id)
        .bind(balance)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(account)
    }

    async fn commit(self) -> Result<(), LedgerError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<(), LedgerError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
