//! PostgreSQL idempotency store (`idempotency_keys_tb`)
//!
//! `set_if_absent` is one `INSERT ... ON CONFLICT DO UPDATE ... WHERE` statement:
//! the row is written when the key is new or its previous entry has expired,
//! and `RETURNING` tells the caller which case applied. PostgreSQL's
//! unique-index locking makes concurrent callers on one key serialize.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;

use super::store::{IdempotencyStore, IdempotencyStoreError};
use crate::db::SafeRow;

const SET_IF_ABSENT_SQL: &str = "INSERT INTO idempotency_keys_tb (key, value, expires_at) \
     VALUES ($1, $2, NOW() + make_interval(secs => $3)) \
     ON CONFLICT (key) DO UPDATE \
         SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at \
         WHERE idempotency_keys_tb.expires_at <= NOW() \
     RETURNING key";

const UPSERT_SQL: &str = "INSERT INTO idempotency_keys_tb (key, value, expires_at) \
     VALUES ($1, $2, NOW() + make_interval(secs => $3)) \
     ON CONFLICT (key) DO UPDATE \
         SET value = EXCLUDED.value, expires_at = EXCLUDED.expires_at";

#[derive(Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete expired rows, returning how many went.
    pub async fn purge_expired(&self) -> Result<u64, IdempotencyStoreError> {
        let result = sqlx::query("DELETE FROM idempotency_keys_tb WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, IdempotencyStoreError> {
        let row = sqlx::query(SET_IF_ABSENT_SQL)
            .bind(key)
            .bind(value)
            .bind(ttl.as_secs_f64())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, IdempotencyStoreError> {
        let row = sqlx::query(
            "SELECT value FROM idempotency_keys_tb WHERE key = $1 AND expires_at > NOW()",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row
                .try_get_log::<String>("value")
                .map(Some)
                .ok_or_else(|| IdempotencyStoreError::Backend(format!("unreadable value for {key}"))),
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<(), IdempotencyStoreError> {
        sqlx::query(UPSERT_SQL)
            .bind(key)
            .bind(value)
            .bind(ttl.as_secs_f64())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), IdempotencyStoreError> {
        sqlx::query("DELETE FROM idempotency_keys_tb WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
