use super::config::StoreConfig;
use crate::core::trace::{self, TraceKind};
use crate::core::{Account, AccountId, Entry, Result, TraceEvent, WorkerContext};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Payload handed to `on_create` callbacks.
#[derive(Debug, Clone)]
pub struct CreateNotice {
    pub entry: Entry,
    pub worker: WorkerContext,
}

/// Payload handed to `on_touch` callbacks.
#[derive(Debug, Clone)]
pub struct TouchNotice {
    pub account: AccountId,
    pub worker: WorkerContext,
}

pub type CreateCallback = Arc<dyn Fn(CreateNotice) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type TouchCallback = Arc<dyn Fn(TouchNotice) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Exclusive account lock. Dropping it releases the lock.
pub struct AccountLock {
    account: AccountId,
    holder: usize,
    _release: Box<dyn Send + Sync>,
}

impl AccountLock {
    pub fn new(account: AccountId, holder: &WorkerContext, release: Box<dyn Send + Sync>) -> Self {
        Self {
            account,
            holder: holder.index(),
            _release: release,
        }
    }

    pub fn account(&self) -> AccountId {
        self.account
    }

    pub fn holder(&self) -> usize {
        self.holder
    }
}

impl std::fmt::Debug for AccountLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountLock")
            .field("account", &self.account)
            .field("holder", &self.holder)
            .finish()
    }
}

/// Ledger store trait - the row store the harness races against
///
/// Each method is atomic on its own; nothing spans two calls unless the
/// caller holds the account lock.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Backend name for logs and reports
    fn name(&self) -> &'static str;

    /// Connection configuration
    fn config(&self) -> &StoreConfig;

    /// Create the account if missing and return it
    async fn ensure_account(&self, account: AccountId) -> Result<Account>;

    /// Read the account row
    async fn account(&self, account: AccountId) -> Result<Account>;

    /// Append an entry, bump `entries_count`, then fire `on_create` callbacks
    async fn create_entry(&self, account: AccountId, amount: i64, ctx: &WorkerContext) -> Result<Entry>;

    /// All entries of the account in creation order
    async fn entries(&self, account: AccountId) -> Result<Vec<Entry>>;

    /// Drop the account's ledger and zero `entries_count`
    async fn delete_all_entries(&self, account: AccountId) -> Result<()>;

    async fn set_balance(&self, account: AccountId, value: i64, ctx: &WorkerContext) -> Result<()>;

    async fn get_balance(&self, account: AccountId) -> Result<i64>;

    /// Sum of entry amounts computed by the store
    async fn sum_entries(&self, account: AccountId) -> Result<i64>;

    /// Take the account lock, retrying a bounded number of times
    async fn acquire_exclusive_lock(&self, account: AccountId, ctx: &WorkerContext) -> Result<AccountLock>;

    /// Add `delta` to the balance without a read; returns the new balance
    async fn atomic_increment_balance(&self, account: AccountId, delta: i64, ctx: &WorkerContext) -> Result<i64>;

    fn register_on_create(&self, account: AccountId, callback: CreateCallback) -> Result<()>;

    fn register_on_touch(&self, account: AccountId, callback: TouchCallback) -> Result<()>;

    fn clear_callbacks(&self, account: AccountId) -> Result<()>;

    /// Bump `updated_at` and dispatch `on_touch` callbacks
    async fn touch(&self, account: AccountId, ctx: &WorkerContext) -> Result<()>;

    /// Wait for asynchronously dispatched touch callbacks
    async fn settle_touches(&self) -> Result<()>;

    /// Append to the trace journal; the store assigns the sequence number
    async fn record_event(&self, account: AccountId, ctx: &WorkerContext, kind: TraceKind) -> Result<TraceEvent>;

    async fn trace(&self, account: AccountId) -> Result<Vec<TraceEvent>>;

    async fn clear_trace(&self, account: AccountId) -> Result<()>;
}

/// Run `critical` while holding the account lock.
///
/// The lock is released whether `critical` succeeds or fails, and the
/// acquire/release steps are journaled so traces show the critical sections.
pub async fn with_exclusive_lock<T, F, Fut>(
    store: &dyn LedgerStore,
    account: AccountId,
    ctx: &WorkerContext,
    critical: F,
) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let lock = store.acquire_exclusive_lock(account, ctx).await?;
    trace::emit(store, ctx, account, TraceKind::LockAcquired).await?;

    let outcome = critical().await;

    let released = trace::emit(store, ctx, account, TraceKind::LockReleased).await;
    drop(lock);

    let value = outcome?;
    released?;
    Ok(value)
}
