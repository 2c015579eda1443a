use std::sync::Arc;

use crate::account::AccountService;
use crate::cache::WalletReader;
use crate::ledger::LedgerStore;
use crate::transfer::TransferService;

/// Gateway shared state
pub struct AppState<S: LedgerStore> {
    pub transfers: Arc<TransferService<S>>,
    pub accounts: Arc<AccountService<S>>,
    /// Cached wallet reads
    pub wallets: Arc<WalletReader<S>>,
}

impl<S: LedgerStore> AppState<S> {
    pub fn new(
        transfers: Arc<TransferService<S>>,
        accounts: Arc<AccountService<S>>,
        wallets: Arc<WalletReader<S>>,
    ) -> Self {
        Self {
            transfers,
            accounts,
            wallets,
        }
    }
}
