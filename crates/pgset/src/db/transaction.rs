//! Context-scoped transactions.
//!
//! A transaction lives in a [`TxContext`] stored in a tokio task-local. Every
//! statement issued by a [`Database`] checks for a context belonging to it
//! and, when a transaction is open, runs on that transaction's connection.
//! The slot is behind an async mutex so statements on one transaction run
//! one at a time, in the order they are awaited.
//!
//! Three entry points:
//! - [`Database::atomic`]: scoped block, commit on `Ok`, rollback on `Err`;
//!   nested blocks join the open transaction.
//! - [`Database::transactional`]: wraps a unit of work into a callable that
//!   runs each invocation through [`Database::atomic`].
//! - [`Database::context`] with [`Database::begin`] / [`Database::commit`] /
//!   [`Database::rollback`] for manual control.
//!
//! A transaction still open when its context future is dropped (cancelled)
//! is rolled back before its connection goes back to the pool.

use super::manager::Database;
use crate::client::GenericClient;
use crate::error::{OrmError, OrmResult};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

tokio::task_local! {
    static TX_CONTEXT: Arc<TxContext>;
}

/// An open transaction and the connection it is bound to.
pub(crate) struct ActiveTx {
    pub(crate) client: deadpool_postgres::Client,
}

pub(crate) struct TxContext {
    owner: usize,
    pub(crate) slot: Mutex<Option<ActiveTx>>,
}

impl TxContext {
    fn new(owner: usize) -> Self {
        Self {
            owner,
            slot: Mutex::new(None),
        }
    }
}

/// The calling task's context, if it belongs to the database `owner`.
pub(crate) fn current(owner: usize) -> Option<Arc<TxContext>> {
    TX_CONTEXT
        .try_with(|ctx| (ctx.owner == owner).then(|| Arc::clone(ctx)))
        .ok()
        .flatten()
}

/// Rolls back whatever is still open in the context when dropped.
struct ContextGuard {
    ctx: Option<Arc<TxContext>>,
}

impl ContextGuard {
    fn new(ctx: Arc<TxContext>) -> Self {
        Self { ctx: Some(ctx) }
    }

    fn disarm(mut self) {
        self.ctx = None;
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let Some(ctx) = self.ctx.take() else {
            return;
        };
        let locked = ctx.slot.try_lock().map(|mut slot| slot.take());
        let taken = match locked {
            Ok(active) => active,
            // A statement future still holds the slot; it is being dropped
            // with us, so finish the cleanup on the runtime.
            Err(_) => {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        let active = ctx.slot.lock().await.take();
                        if let Some(active) = active {
                            rollback_detached(active).await;
                        }
                    });
                }
                return;
            }
        };
        let Some(active) = taken else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(rollback_detached(active));
            }
            Err(_) => {
                tracing::warn!(
                    target: "pgset.db",
                    "transaction dropped outside a runtime; discarding its connection"
                );
                drop(deadpool_postgres::Object::take(active.client));
            }
        }
    }
}

async fn rollback_detached(active: ActiveTx) {
    tracing::warn!(target: "pgset.db", "transaction cancelled; rolling back");
    if let Err(e) = GenericClient::batch_execute(&active.client, "ROLLBACK").await {
        tracing::warn!(target: "pgset.db", error = %e, "rollback after cancel failed; discarding connection");
        drop(deadpool_postgres::Object::take(active.client));
    }
}

impl Database {
    fn context_for_self(&self) -> Option<Arc<TxContext>> {
        current(self.id())
    }

    async fn begin_in(&self, ctx: &TxContext) -> OrmResult<()> {
        let mut slot = ctx.slot.lock().await;
        if slot.is_some() {
            return Err(OrmError::Transaction(
                "a transaction is already active in this context".into(),
            ));
        }
        let client = self.write_pool().pool.get().await?;
        // Parked before BEGIN is sent, so a cancelled BEGIN is still rolled back.
        let active = slot.insert(ActiveTx { client });
        let begun = GenericClient::batch_execute(&active.client, "BEGIN").await;
        if let Err(e) = begun {
            *slot = None;
            return Err(e);
        }
        tracing::debug!(target: "pgset.db", connection = %self.write_pool().name, "BEGIN");
        Ok(())
    }

    /// End the open transaction; `Ok(false)` when there was none.
    async fn end_in(&self, ctx: &TxContext, commit: bool) -> OrmResult<bool> {
        let Some(active) = ctx.slot.lock().await.take() else {
            return Ok(false);
        };
        let sql = if commit { "COMMIT" } else { "ROLLBACK" };
        match GenericClient::batch_execute(&active.client, sql).await {
            Ok(()) => {
                tracing::debug!(target: "pgset.db", connection = %self.write_pool().name, "{sql}");
                Ok(true)
            }
            Err(e) => {
                // The session state is unknown; keep it out of the pool.
                drop(deadpool_postgres::Object::take(active.client));
                Err(e)
            }
        }
    }

    async fn finish<T>(&self, ctx: &TxContext, result: OrmResult<T>) -> OrmResult<T> {
        match result {
            Ok(value) => {
                self.end_in(ctx, true).await?;
                Ok(value)
            }
            Err(error) => match self.end_in(ctx, false).await {
                Ok(_) => Err(error),
                Err(rollback) => Err(OrmError::RollbackFailed {
                    error: Box::new(error),
                    rollback: Box::new(rollback),
                }),
            },
        }
    }

    /// Run `f` inside a transaction on the write connection.
    ///
    /// Commits when `f` returns `Ok`, rolls back when it returns `Err`. When a
    /// transaction is already open in the calling context, `f` simply joins
    /// it and the outermost block decides the outcome.
    pub async fn atomic<F, Fut, T>(&self, f: F) -> OrmResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = OrmResult<T>>,
    {
        if let Some(ctx) = self.context_for_self() {
            if ctx.slot.lock().await.is_some() {
                return f().await;
            }
            return self.run_in_new_transaction(ctx, f).await;
        }

        let ctx = Arc::new(TxContext::new(self.id()));
        TX_CONTEXT
            .scope(Arc::clone(&ctx), self.run_in_new_transaction(ctx, f))
            .await
    }

    async fn run_in_new_transaction<F, Fut, T>(&self, ctx: Arc<TxContext>, f: F) -> OrmResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = OrmResult<T>>,
    {
        let guard = ContextGuard::new(Arc::clone(&ctx));
        if let Err(e) = self.begin_in(&ctx).await {
            guard.disarm();
            return Err(e);
        }
        let result = f().await;
        let outcome = self.finish(&ctx, result).await;
        guard.disarm();
        outcome
    }

    /// Wrap a unit of work so that every call runs in [`Database::atomic`].
    ///
    /// ```ignore
    /// let transfer = db.transactional(|(from, to, amount): (i64, i64, i64)| {
    ///     let db = db.clone();
    ///     async move { /* two updates */ Ok(()) }
    /// });
    /// transfer((1, 2, 100)).await?;
    /// ```
    pub fn transactional<A, F, Fut, T>(
        &self,
        f: F,
    ) -> impl Fn(A) -> BoxFuture<'static, OrmResult<T>> + Send + Sync + 'static
    where
        A: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = OrmResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        let f = Arc::new(f);
        move |arg: A| {
            let db = db.clone();
            let f = Arc::clone(&f);
            let fut: BoxFuture<'static, OrmResult<T>> =
                Box::pin(async move { db.atomic(move || f(arg)).await });
            fut
        }
    }

    /// Run `fut` with a fresh transaction context for explicit
    /// [`begin`](Database::begin) / [`commit`](Database::commit) /
    /// [`rollback`](Database::rollback).
    ///
    /// A transaction left open when `fut` finishes is rolled back.
    pub async fn context<Fut, T>(&self, fut: Fut) -> T
    where
        Fut: Future<Output = T>,
    {
        let ctx = Arc::new(TxContext::new(self.id()));
        let guard = ContextGuard::new(Arc::clone(&ctx));
        let out = TX_CONTEXT.scope(Arc::clone(&ctx), fut).await;
        if ctx.slot.lock().await.is_some() {
            tracing::warn!(target: "pgset.db", "transaction left open at end of context; rolling back");
            if let Err(e) = self.end_in(&ctx, false).await {
                tracing::warn!(target: "pgset.db", error = %e, "rollback at end of context failed");
            }
        }
        guard.disarm();
        out
    }

    fn require_context(&self, action: &str) -> OrmResult<Arc<TxContext>> {
        self.context_for_self().ok_or_else(|| {
            OrmError::Transaction(format!(
                "{action}() called outside a transaction context; wrap the work in Database::context"
            ))
        })
    }

    /// Open a transaction in the current context.
    pub async fn begin(&self) -> OrmResult<()> {
        let ctx = self.require_context("begin")?;
        self.begin_in(&ctx).await
    }

    pub async fn commit(&self) -> OrmResult<()> {
        let ctx = self.require_context("commit")?;
        match self.end_in(&ctx, true).await? {
            true => Ok(()),
            false => Err(OrmError::Transaction("commit() with no active transaction".into())),
        }
    }

    pub async fn rollback(&self) -> OrmResult<()> {
        let ctx = self.require_context("rollback")?;
        match self.end_in(&ctx, false).await? {
            true => Ok(()),
            false => Err(OrmError::Transaction(
                "rollback() with no active transaction".into(),
            )),
        }
    }

    /// Whether the calling context has an open transaction on this database.
    pub async fn in_transaction(&self) -> bool {
        match self.context_for_self() {
            Some(ctx) => ctx.slot.lock().await.is_some(),
            None => false,
        }
    }
}
