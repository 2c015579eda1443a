//! Wallet read cache
//!
//! Read-through cache in front of the ledger for `GET /wallets/{id}`.
//! Entries are JSON wallet views under `wallet:<id>` with a TTL. The cache is
//! never authoritative: a miss or any cache error falls back to the ledger, and
//! the transfer engine evicts both wallets after every committed transfer.
//!
//! A read that misses loads from the ledger and then writes back. An eviction
//! landing between the load and the write would be undone by that write, so
//! evictions bump an epoch and a fill that saw the epoch move discards its
//! own entry.

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core_types::{AccountId, UserId};
use crate::error::{ServiceError, ServiceResult};
use crate::ledger::{Account, LedgerStore};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Key-value cache with per-entry TTL
#[async_trait]
pub trait WalletCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

pub fn wallet_key(id: AccountId) -> String {
    format!("wallet:{id}")
}

/// Wallet as served to readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletView {
    pub id: AccountId,
    pub balance: Decimal,
    pub user_id: UserId,
}

impl From<Account> for WalletView {
    fn from(a: Account) -> Self {
        Self {
            id: a.id,
            balance: a.balance,
            user_id: a.user_id,
        }
    }
}

/// In-process cache backend
#[derive(Default)]
pub struct MemoryWalletCache {
    entries: DashMap<String, (String, Instant)>,
}

impl MemoryWalletCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry, returning how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, (_, deadline)| *deadline > now);
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl WalletCache for MemoryWalletCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        // Expired entries are dropped lazily on read
        let expired = match self.entries.get(key) {
            Some(entry) if entry.1 > now => return Ok(Some(entry.0.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, (_, deadline)| *deadline <= now);
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// Read-through wallet lookups plus eviction.
///
/// `cache: None` means caching is disabled and every read hits the ledger.
pub struct WalletReader<S: LedgerStore> {
    store: Arc<S>,
    cache: Option<Arc<dyn WalletCache>>,
    ttl: Duration,
    /// Bumped by every eviction
    evictions: AtomicU64,
}

impl<S: LedgerStore> WalletReader<S> {
    pub fn new(store: Arc<S>, cache: Option<Arc<dyn WalletCache>>, ttl: Duration) -> Self {
        Self {
            store,
            cache,
            ttl,
            evictions: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Cached wallet read; falls back to the ledger on miss or cache error.
    pub async fn get_wallet(&self, id: AccountId) -> ServiceResult<WalletView> {
        let key = wallet_key(id);

        if let Some(cache) = &self.cache {
            match cache.get(&key).await {
                Ok(Some(raw)) => match serde_json::from_str::<WalletView>(&raw) {
                    Ok(view) => {
                        debug!(wallet_id = id, "Wallet cache hit");
                        return Ok(view);
                    }
                    Err(e) => warn!(wallet_id = id, error = %e, "Corrupt wallet cache entry"),
                },
                Ok(None) => debug!(wallet_id = id, "Wallet cache miss"),
                Err(e) => warn!(wallet_id = id, error = %e, "Wallet cache read failed, using ledger"),
            }
        }

        let epoch = self.evictions.load(Ordering::SeqCst);
        let view: WalletView = self
            .store
            .get_account(id)
            .await?
            .ok_or(ServiceError::WalletNotFound(id))?
            .into();

        if let Some(cache) = &self.cache {
            self.fill(cache.as_ref(), &key, &view, epoch).await;
        }

        Ok(view)
    }

    /// Best-effort write-back of a view loaded at `epoch`.
    async fn fill(&self, cache: &dyn WalletCache, key: &str, view: &WalletView, epoch: u64) {
        if self.evictions.load(Ordering::SeqCst) != epoch {
            debug!(wallet_id = view.id, "Eviction during load, not caching");
            return;
        }
        let raw = match serde_json::to_string(view) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(wallet_id = view.id, error = %e, "Wallet view serialization failed");
                return;
            }
        };
        if let Err(e) = cache.set(key, raw, self.ttl).await {
            warn!(wallet_id = view.id, error = %e, "Wallet cache write failed");
            return;
        }
        // An eviction that ran while the write was in flight may have been overwritten
        if self.evictions.load(Ordering::SeqCst) != epoch
            && let Err(e) = cache.delete(key).await
        {
            warn!(wallet_id = view.id, error = %e, "Wallet cache cleanup failed");
        }
    }

    /// Drop a wallet's cached view. No-op when caching is disabled.
    pub async fn evict(&self, id: AccountId) -> Result<(), CacheError> {
        match &self.cache {
            Some(cache) => {
                self.evictions.fetch_add(1, Ordering::SeqCst);
                cache.delete(&wallet_key(id)).await
            }
            None => Ok(()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::{FlakyCache, GatedCache};
    use super::*;
    use crate::ledger::{LedgerTx, MemoryLedger};

    const TTL: Duration = Duration::from_secs(60);

    async fn ledger_with_wallet(balance: i64) -> (Arc<MemoryLedger>, Account) {
        let ledger = Arc::new(MemoryLedger::default());
        let account = ledger.seed_wallet(Decimal::from(balance)).await.unwrap();
        (ledger, account)
    }

    #[tokio::test]
    async fn test_memory_cache_ttl_expiry() {
        let cache = MemoryWalletCache::new();
        cache.set("k", "v".into(), Duration::ZERO).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty());

        cache.set("k", "v".into(), TTL).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired_entries() {
        let cache = MemoryWalletCache::new();
        for i in 0..1000 {
            cache
                .set(&wallet_key(i), "v".into(), Duration::ZERO)
                .await
                .unwrap();
        }
        cache.set("live", "v".into(), TTL).await.unwrap();
        assert_eq!(cache.len(), 1001);

        assert_eq!(cache.purge_expired(), 1000);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("live").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_eviction_during_fill_is_not_overwritten() {
        let (ledger, account) = ledger_with_wallet(100).await;
        let cache = Arc::new(GatedCache::default());
        let reader = Arc::new(WalletReader::new(
            Arc::clone(&ledger),
            Some(cache.clone() as Arc<dyn WalletCache>),
            TTL,
        ));

        // Reader misses, loads 100 and parks before writing it back
        let pending = tokio::spawn({
            let reader = Arc::clone(&reader);
            async move { reader.get_wallet(account.id).await }
        });
        cache.write_waiting.notified().await;

        // A transfer commits and evicts in the meantime
        let mut tx = ledger.begin().await.unwrap();
        tx.lock_accounts(&[account.id]).await.unwrap();
        tx.set_balance(account.id, Decimal::from(60)).await.unwrap();
        tx.commit().await.unwrap();
        reader.evict(account.id).await.unwrap();

        cache.open.notify_one();
        assert_eq!(pending.await.unwrap().unwrap().balance, Decimal::from(100));

        assert_eq!(cache.inner.get(&wallet_key(account.id)).await.unwrap(), None);
        cache.open.notify_one();
        assert_eq!(
            reader.get_wallet(account.id).await.unwrap().balance,
            Decimal::from(60)
        );
    }

    #[tokio::test]
    async fn test_cache_hit_skips_ledger() {
        let (ledger, account) = ledger_with_wallet(100).await;
        let cache = Arc::new(MemoryWalletCache::new());
        let stale = WalletView {
            id: account.id,
            balance: Decimal::new(5500, 2),
            user_id: account.user_id,
        };
        cache
            .set(
                &wallet_key(account.id),
                serde_json::to_string(&stale).unwrap(),
                TTL,
            )
            .await
            .unwrap();

        let reader = WalletReader::new(ledger, Some(cache as Arc<dyn WalletCache>), TTL);
        assert_eq!(reader.get_wallet(account.id).await.unwrap(), stale);
    }

    #[tokio::test]
    async fn test_cache_miss_populates_cache() {
        let (ledger, account) = ledger_with_wallet(100).await;
        let cache = Arc::new(MemoryWalletCache::new());
        let reader = WalletReader::new(ledger, Some(cache.clone() as Arc<dyn WalletCache>), TTL);

        let view = reader.get_wallet(account.id).await.unwrap();
        assert_eq!(view.balance, Decimal::from(100));

        let raw = cache.get(&wallet_key(account.id)).await.unwrap().unwrap();
        let cached: WalletView = serde_json::from_str(&raw).unwrap();
        assert_eq!(cached, view);
    }

    #[tokio::test]
    async fn test_cache_errors_fall_back_to_ledger() {
        let (ledger, account) = ledger_with_wallet(12).await;
        let cache = Arc::new(FlakyCache {
            fail_get: true,
            fail_set: true,
            ..Default::default()
        });
        let reader = WalletReader::new(ledger, Some(cache as Arc<dyn WalletCache>), TTL);

        let view = reader.get_wallet(account.id).await.unwrap();
        assert_eq!(view.balance, Decimal::from(12));
    }

    #[tokio::test]
    async fn test_corrupt_entry_falls_back_to_ledger() {
        let (ledger, account) = ledger_with_wallet(7).await;
        let cache = Arc::new(MemoryWalletCache::new());
        cache
            .set(&wallet_key(account.id), "not json".into(), TTL)
            .await
            .unwrap();
        let reader = WalletReader::new(ledger, Some(cache as Arc<dyn WalletCache>), TTL);

        assert_eq!(
            reader.get_wallet(account.id).await.unwrap().balance,
            Decimal::from(7)
        );
    }

    #[tokio::test]
    async fn test_missing_wallet() {
        let ledger = Arc::new(MemoryLedger::default());
        let reader = WalletReader::new(ledger, None, TTL);
        assert_eq!(
            reader.get_wallet(404).await.unwrap_err(),
            ServiceError::WalletNotFound(404)
        );
    }

    #[tokio::test]
    async fn test_evict_without_cache_is_noop() {
        let ledger = Arc::new(MemoryLedger::default());
        let reader = WalletReader::new(ledger, None, TTL);
        assert!(!reader.is_enabled());
        assert!(reader.evict(1).await.is_ok());
    }
}
