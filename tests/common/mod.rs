//! Shared wiring for integration tests: everything in memory, no external services.

#![allow(dead_code)]

use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use wallet_transfer::account::AccountService;
use wallet_transfer::cache::{MemoryWalletCache, WalletCache, WalletReader};
use wallet_transfer::config::IdempotencyConfig;
use wallet_transfer::core_types::TransferId;
use wallet_transfer::gateway::state::AppState;
use wallet_transfer::idempotency::{IdempotencyManager, IdempotencyStore, MemoryIdempotencyStore};
use wallet_transfer::ledger::{Account, MemoryLedger};
use wallet_transfer::notify::notification_channel;
use wallet_transfer::transfer::{PostCommitEffects, TransferEngine, TransferService};
use wallet_transfer::unit_of_work::TransactionScope;

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

pub struct Harness {
    pub ledger: Arc<MemoryLedger>,
    pub cache: Arc<MemoryWalletCache>,
    pub wallets: Arc<WalletReader<MemoryLedger>>,
    pub service: Arc<TransferService<MemoryLedger>>,
    pub accounts: Arc<AccountService<MemoryLedger>>,
    /// Receiving end of the notification queue
    pub notifications: mpsc::Receiver<TransferId>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_idempotency(
            Some(Arc::new(MemoryIdempotencyStore::new()) as Arc<dyn IdempotencyStore>),
            IdempotencyConfig::default(),
        )
    }

    pub fn with_idempotency(
        store: Option<Arc<dyn IdempotencyStore>>,
        config: IdempotencyConfig,
    ) -> Self {
        let ledger = Arc::new(MemoryLedger::new(Duration::from_secs(5)));
        let scope = TransactionScope::new(Arc::clone(&ledger));
        let cache = Arc::new(MemoryWalletCache::new());
        let wallets = Arc::new(WalletReader::new(
            Arc::clone(&ledger),
            Some(cache.clone() as Arc<dyn WalletCache>),
            Duration::from_secs(60),
        ));
        let (notifier, notifications) = notification_channel(1024);
        let engine = Arc::new(TransferEngine::new(
            scope.clone(),
            PostCommitEffects {
                wallets: Arc::clone(&wallets),
                notifier: Arc::new(notifier),
            },
        ));
        let service = Arc::new(TransferService::new(
            engine,
            Arc::new(IdempotencyManager::new(store, &config)),
            Arc::clone(&ledger),
        ));
        let accounts = Arc::new(AccountService::new(scope, dec("100.00")));
        Self {
            ledger,
            cache,
            wallets,
            service,
            accounts,
            notifications,
        }
    }

    pub async fn wallet(&self, balance: &str) -> Account {
        self.ledger.seed_wallet(dec(balance)).await.unwrap()
    }

    pub fn balance(&self, account: &Account) -> Decimal {
        self.ledger.balances()[&account.id]
    }

    /// Transfer ids notified so far
    pub fn drain_notifications(&mut self) -> Vec<TransferId> {
        let mut ids = Vec::new();
        while let Ok(id) = self.notifications.try_recv() {
            ids.push(id);
        }
        ids
    }

    pub fn app_state(&self) -> Arc<AppState<MemoryLedger>> {
        Arc::new(AppState::new(
            Arc::clone(&self.service),
            Arc::clone(&self.accounts),
            Arc::clone(&self.wallets),
        ))
    }
}
