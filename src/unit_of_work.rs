//! Unit of Work and Commit Hooks
//!
//! A [`UnitOfWork`] is an explicit handle on one ledger transaction. Code
//! that needs "do this after everything commits" registers a hook on the
//! handle it was given, without knowing whether it runs in the outermost
//! unit or in a nested one.
//!
//! # Lifecycle
//!
//! ```text
//! TransactionScope::within(None, f)        outermost: BEGIN
//!   └─ f(uow)
//!        ├─ uow.on_commit(hook_a)
//!        └─ TransactionScope::within(Some(uow), g)   nested: SAVEPOINT
//!             └─ g(uow) → uow.on_commit(hook_b)      RELEASE
//! COMMIT → hook_a, hook_b (registration order)
//! ```
//!
//! # Failure rules
//!
//! - Outermost `f` fails, or commit fails → ROLLBACK, hooks dropped unfired
//! - Nested `g` fails → ROLLBACK TO SAVEPOINT, hooks registered inside `g` dropped
//! - A hook fails or panics after commit → logged, the rest still run,
//!   the caller still gets `Ok`

use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::ledger::{LedgerError, LedgerStore, LedgerTx};

type HookFn = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

/// A deferred side effect, run once after the outermost commit
pub struct CommitHook {
    name: &'static str,
    run: HookFn,
}

impl CommitHook {
    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Explicit handle on the current ledger transaction
pub struct UnitOfWork<T: LedgerTx> {
    tx: T,
    depth: usize,
    hooks: Vec<CommitHook>,
}

impl<T: LedgerTx> UnitOfWork<T> {
    fn new(tx: T) -> Self {
        Self {
            tx,
            depth: 0,
            hooks: Vec::new(),
        }
    }

    /// The underlying ledger transaction
    pub fn tx(&mut self) -> &mut T {
        &mut self.tx
    }

    /// 0 for the outermost unit, +1 per open savepoint
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_nested(&self) -> bool {
        self.depth > 0
    }

    pub fn pending_hooks(&self) -> usize {
        self.hooks.len()
    }

    /// Register a side effect to run after the outermost commit.
    pub fn on_commit<F, Fut>(&mut self, name: &'static str, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        debug!(hook = name, depth = self.depth, "Commit hook registered");
        self.hooks.push(CommitHook {
            name,
            run: Box::new(move || hook().boxed()),
        });
    }

    /// Run `f` as a nested sub-unit behind a savepoint.
    pub async fn nested<R, E, F>(&mut self, f: F) -> Result<R, E>
    where
        F: for<'a> FnOnce(&'a mut UnitOfWork<T>) -> BoxFuture<'a, Result<R, E>> + Send,
        E: From<LedgerError>,
    {
        self.tx.savepoint().await?;
        self.depth += 1;
        let hooks_before = self.hooks.len();

        let result = f(self).await;
        self.depth -= 1;

        match result {
            Ok(value) => {
                self.tx.release_savepoint().await?;
                Ok(value)
            }
            Err(e) => {
                let discarded = self.hooks.len() - hooks_before;
                self.hooks.truncate(hooks_before);
                if let Err(rb) = self.tx.rollback_to_savepoint().await {
                    warn!(error = %rb, "Rollback to savepoint failed");
                }
                debug!(discarded, "Nested unit of work rolled back");
                Err(e)
            }
        }
    }

    fn into_parts(self) -> (T, Vec<CommitHook>) {
        (self.tx, self.hooks)
    }
}

/// Starts outermost units of work on a [`LedgerStore`] and drains their hooks.
pub struct TransactionScope<S: LedgerStore> {
    store: Arc<S>,
}

impl<S: LedgerStore> Clone for TransactionScope<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> TransactionScope<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run `f` in the caller's unit of work (nested) or in a new outermost one.
    pub async fn within<R, E, F>(
        &self,
        parent: Option<&mut UnitOfWork<S::Tx>>,
        f: F,
    ) -> Result<R, E>
    where
        F: for<'a> FnOnce(&'a mut UnitOfWork<S::Tx>) -> BoxFuture<'a, Result<R, E>> + Send,
        E: From<LedgerError>,
    {
        match parent {
            Some(uow) => uow.nested(f).await,
            None => self.run(f).await,
        }
    }

    /// Run `f` in a new outermost unit: commit on `Ok`, then fire hooks.
    pub async fn run<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: for<'a> FnOnce(&'a mut UnitOfWork<S::Tx>) -> BoxFuture<'a, Result<R, E>> + Send,
        E: From<LedgerError>,
    {
        let tx = self.store.begin().await?;
        let mut uow = UnitOfWork::new(tx);

        match f(&mut uow).await {
            Ok(value) => {
                let (tx, hooks) = uow.into_parts();
                // A failed commit drops the hooks unfired
                tx.commit().await?;
                drain_hooks(hooks).await;
                Ok(value)
            }
            Err(e) => {
                let (tx, hooks) = uow.into_parts();
                if !hooks.is_empty() {
                    debug!(discarded = hooks.len(), "Unit of work failed, hooks discarded");
                }
                drop(hooks);
                if let Err(rb) = tx.rollback().await {
                    warn!(error = %rb, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// Fire hooks in registration order; each failure is isolated.
async fn drain_hooks(hooks: Vec<CommitHook>) {
    for hook in hooks {
        let name = hook.name;
        match AssertUnwindSafe((hook.run)()).catch_unwind().await {
            Ok(Ok(())) => debug!(hook = name, "Post-commit hook done"),
            Ok(Err(e)) => warn!(hook = name, error = %e, "Post-commit hook failed"),
            Err(_) => error!(hook = name, "Post-commit hook panicked"),
        }
    }
}
