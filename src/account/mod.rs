//! Users and wallets
//!
//! Every user owns exactly one wallet, created in the same unit of work and
//! seeded with the configured initial balance.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::core_types::{AccountId, UserId};
use crate::error::{ServiceError, ServiceResult};
use crate::ledger::{Account, LedgerStore, LedgerTx, Transfer, User};
use crate::unit_of_work::TransactionScope;

/// Default page size of wallet history
pub const DEFAULT_HISTORY_LIMIT: i64 = 50;
/// Largest page of wallet history a caller may request
pub const MAX_HISTORY_LIMIT: i64 = 500;

/// A user together with its wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserWithWallet {
    pub id: UserId,
    pub created_at: DateTime<Utc>,
    pub wallet: Account,
}

pub struct AccountService<S: LedgerStore> {
    scope: TransactionScope<S>,
    initial_balance: Decimal,
}

impl<S: LedgerStore> AccountService<S> {
    pub fn new(scope: TransactionScope<S>, initial_balance: Decimal) -> Self {
        Self {
            scope,
            initial_balance,
        }
    }

    fn store(&self) -> &Arc<S> {
        self.scope.store()
    }

    /// Create a user and its wallet atomically.
    pub async fn create_user(&self) -> ServiceResult<UserWithWallet> {
        let initial_balance = self.initial_balance;
        let (user, wallet): (User, Account) = self
            .scope
            .run(move |uow| {
                async move {
                    let user = uow.tx().insert_user().await?;
                    let wallet = uow.tx().insert_account(user.id, initial_balance).await?;
                    Ok::<_, ServiceError>((user, wallet))
                }
                .boxed()
            })
            .await?;

        info!(user_id = user.id, wallet_id = wallet.id, balance = %wallet.balance, "User created");
        Ok(UserWithWallet {
            id: user.id,
            created_at: user.created_at,
            wallet,
        })
    }

    pub async fn get_user(&self, id: UserId) -> ServiceResult<UserWithWallet> {
        let user = self
            .store()
            .get_user(id)
            .await?
            .ok_or(ServiceError::UserNotFound(id))?;
        // A user without a wallet is a broken invariant, not a client error
        let wallet = self
            .store()
            .get_account_by_owner(id)
            .await?
            .ok_or_else(|| ServiceError::Internal(format!("user {id} has no wallet")))?;
        Ok(UserWithWallet {
            id: user.id,
            created_at: user.created_at,
            wallet,
        })
    }

    /// Incoming and outgoing transfers of a wallet, newest first.
    pub async fn list_transfers(
        &self,
        wallet_id: AccountId,
        limit: Option<i64>,
    ) -> ServiceResult<Vec<Transfer>> {
        if self.store().get_account(wallet_id).await?.is_none() {
            return Err(ServiceError::WalletNotFound(wallet_id));
        }
        let limit = limit
            .unwrap_or(DEFAULT_HISTORY_LIMIT)
            .clamp(1, MAX_HISTORY_LIMIT);
        Ok(self.store().list_transfers(wallet_id, limit).await?)
    }
}
