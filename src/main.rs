//! Wallet Transfer - HTTP service entry point
//!
//! ```text
//! ┌─────────┐    ┌──────────────┐    ┌─────────────┐    ┌────────────┐
//! │ Gateway │───▶│ Idempotency  │───▶│  Transfer   │───▶│   Ledger   │
//! │ (axum)  │    │ reservation  │    │   engine    │    │ (row locks)│
//! └─────────┘    └──────────────┘    └──────┬──────┘    └────────────┘
//!                                           │ after commit
//!                                  ┌────────┴────────┐
//!                                  ▼                 ▼
//!                            cache evict      notification queue
//! ```
//!
//! Usage: `wallet_transfer [--env dev] [--port 8080]`

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use wallet_transfer::account::AccountService;
use wallet_transfer::cache::{MemoryWalletCache, WalletCache, WalletReader};
use wallet_transfer::config::{AppConfig, StoreBackend};
use wallet_transfer::db::Database;
use wallet_transfer::gateway::{self, state::AppState};
use wallet_transfer::idempotency::{
    IdempotencyManager, IdempotencyStore, MemoryIdempotencyStore, PgIdempotencyStore,
};
use wallet_transfer::ledger::{LedgerStore, MemoryLedger, PgLedger};
use wallet_transfer::logging;
use wallet_transfer::notify::{DeliveryPolicy, NotificationWorker, notification_channel};
use wallet_transfer::transfer::{PostCommitEffects, TransferEngine, TransferService};
use wallet_transfer::unit_of_work::TransactionScope;

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| names.contains(&a.as_str()))
        .and_then(|i| args.get(i + 1).cloned())
}

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn get_port_override() -> anyhow::Result<Option<u16>> {
    get_arg(&["--port", "-p"])
        .map(|p| p.parse::<u16>().with_context(|| format!("Invalid --port: {p}")))
        .transpose()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let mut config = AppConfig::load(&env)?;
    if let Some(port) = get_port_override()? {
        config.gateway.port = port;
    }

    let _log_guard = logging::init_logging(&config);
    info!(
        env = %env,
        ledger = ?config.database.backend,
        idempotency = ?config.idempotency.backend,
        cache = config.cache.enabled,
        "Starting wallet transfer service"
    );

    let uses_postgres = config.database.backend == StoreBackend::Postgres
        || (config.idempotency.enabled && config.idempotency.backend == StoreBackend::Postgres);
    let database = if uses_postgres {
        let db = Database::connect(
            &config.database.url,
            config.database.max_connections,
            config.database.acquire_timeout(),
        )
        .await
        .context("Failed to connect to PostgreSQL")?;
        db.health_check()
            .await
            .context("PostgreSQL health check failed")?;
        db.ensure_schema()
            .await
            .context("Failed to create database schema")?;
        Some(db)
    } else {
        None
    };

    let idempotency_store = build_idempotency_store(&config, database.as_ref());
    let idempotency = Arc::new(IdempotencyManager::new(
        idempotency_store,
        &config.idempotency,
    ));
    if !idempotency.is_enabled() {
        warn!("Idempotency disabled: every keyed transfer will be rejected");
    }

    match (config.database.backend, database) {
        (StoreBackend::Postgres, Some(db)) => {
            let ledger = PgLedger::new(db.pool().clone(), config.database.lock_timeout());
            serve(config, Arc::new(ledger), idempotency).await
        }
        _ => {
            let ledger = MemoryLedger::new(config.database.lock_timeout());
            serve(config, Arc::new(ledger), idempotency).await
        }
    }
}

fn build_idempotency_store(
    config: &AppConfig,
    database: Option<&Database>,
) -> Option<Arc<dyn IdempotencyStore>> {
    if !config.idempotency.enabled {
        return None;
    }
    match (config.idempotency.backend, database) {
        (StoreBackend::Postgres, Some(db)) => {
            let store = Arc::new(PgIdempotencyStore::new(db.pool().clone()));
            spawn_idempotency_purge(Arc::clone(&store), config.idempotency.pending_ttl());
            Some(store as Arc<dyn IdempotencyStore>)
        }
        (StoreBackend::Postgres, None) => None,
        (StoreBackend::Memory, _) => {
            let store = Arc::new(MemoryIdempotencyStore::new());
            let purged = Arc::clone(&store);
            spawn_memory_purge("idempotency", config.idempotency.pending_ttl(), move || {
                purged.purge_expired()
            });
            Some(store as Arc<dyn IdempotencyStore>)
        }
    }
}

/// Expired rows are already ignored by reads; this only bounds table growth.
fn spawn_idempotency_purge(store: Arc<PgIdempotencyStore>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(n) => info!(purged = n, "Expired idempotency keys removed"),
                Err(e) => warn!(error = %e, "Idempotency purge failed"),
            }
        }
    });
}

/// Periodic sweep of an in-process TTL store; reads already skip expired entries.
fn spawn_memory_purge<F>(store: &'static str, every: Duration, purge: F)
where
    F: Fn() -> usize + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            let purged = purge();
            if purged > 0 {
                debug!(store, purged, "Expired entries removed");
            }
        }
    });
}

async fn serve<S: LedgerStore>(
    config: AppConfig,
    ledger: Arc<S>,
    idempotency: Arc<IdempotencyManager>,
) -> anyhow::Result<()> {
    let scope = TransactionScope::new(Arc::clone(&ledger));

    let cache: Option<Arc<dyn WalletCache>> = if config.cache.enabled {
        let cache = Arc::new(MemoryWalletCache::new());
        let purged = Arc::clone(&cache);
        spawn_memory_purge(
            "wallet_cache",
            Duration::from_secs(config.cache.ttl_secs),
            move || purged.purge_expired(),
        );
        Some(cache as Arc<dyn WalletCache>)
    } else {
        None
    };
    let wallets = Arc::new(WalletReader::new(
        Arc::clone(&ledger),
        cache,
        Duration::from_secs(config.cache.ttl_secs),
    ));

    let (notifier, rx) = notification_channel(config.notify.queue_size);
    let worker = NotificationWorker::new(rx, DeliveryPolicy::from(&config.notify));
    tokio::spawn(worker.run());

    let engine = Arc::new(TransferEngine::new(
        scope.clone(),
        PostCommitEffects {
            wallets: Arc::clone(&wallets),
            notifier: Arc::new(notifier),
        },
    ));
    let transfers = Arc::new(TransferService::new(
        engine,
        idempotency,
        Arc::clone(&ledger),
    ));
    let accounts = Arc::new(AccountService::new(
        scope,
        config.database.initial_balance()?,
    ));

    let state = Arc::new(AppState::new(transfers, accounts, wallets));
    gateway::run_server(&config.gateway, state).await
}
