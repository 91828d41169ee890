use super::config::StoreConfig;
use super::engine::{AccountLock, CreateCallback, CreateNotice, LedgerStore, TouchCallback, TouchNotice};
use super::notify::NotificationHub;
use super::state::LedgerState;
use crate::core::{
    Account, AccountId, Entry, LedgerError, Result, TraceEvent, TraceKind, WorkerContext,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// In-process ledger store.
///
/// Rows sit behind one mutex, so each call is atomic; account locks are
/// separate async mutexes so a critical section can span awaits.
pub struct MemoryLedgerStore {
    config: StoreConfig,
    state: Mutex<LedgerState>,
    locks: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
    hub: NotificationHub,
}

impl MemoryLedgerStore {
    pub fn new(config: StoreConfig) -> Self {
        let hub = NotificationHub::new(config.touch_mode);
        Self {
            config,
            state: Mutex::new(LedgerState::new()),
            locks: Mutex::new(HashMap::new()),
            hub,
        }
    }

    fn account_mutex(&self, account: AccountId) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self.locks.lock()?;
        Ok(locks.entry(account).or_default().clone())
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new(StoreConfig::memory())
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn ensure_account(&self, account: AccountId) -> Result<Account> {
        Ok(self.state.lock()?.ensure_account(account))
    }

    async fn account(&self, account: AccountId) -> Result<Account> {
        self.state.lock()?.account(account)
    }

    async fn create_entry(&self, account: AccountId, amount: i64, ctx: &WorkerContext) -> Result<Entry> {
        let entry = self.state.lock()?.create_entry(account, amount)?;
        tracing::debug!(worker = ctx.index(), account = %account, entry = %entry.id, "entry committed");

        self.hub
            .fire_create(CreateNotice {
                entry: entry.clone(),
                worker: *ctx,
            })
            .await?;
        Ok(entry)
    }

    async fn entries(&self, account: AccountId) -> Result<Vec<Entry>> {
        self.state.lock()?.entries(account)
    }

    async fn delete_all_entries(&self, account: AccountId) -> Result<()> {
        let removed = self.state.lock()?.delete_all_entries(account)?;
        tracing::debug!(account = %account, removed, "ledger cleared");
        Ok(())
    }

    async fn set_balance(&self, account: AccountId, value: i64, ctx: &WorkerContext) -> Result<()> {
        self.state.lock()?.set_balance(account, value)?;
        tracing::debug!(worker = ctx.index(), account = %account, value, "balance written");
        Ok(())
    }

    async fn get_balance(&self, account: AccountId) -> Result<i64> {
        Ok(self.state.lock()?.account(account)?.balance)
    }

    async fn sum_entries(&self, account: AccountId) -> Result<i64> {
        self.state.lock()?.sum_entries(account)
    }

    async fn acquire_exclusive_lock(&self, account: AccountId, ctx: &WorkerContext) -> Result<AccountLock> {
        let mutex = self.account_mutex(account)?;

        for attempt in 1..=self.config.lock_attempts {
            if let Ok(guard) = mutex.clone().try_lock_owned() {
                tracing::debug!(worker = ctx.index(), account = %account, attempt, "account lock taken");
                return Ok(AccountLock::new(account, ctx, Box::new(guard)));
            }
            if attempt < self.config.lock_attempts {
                tokio::time::sleep(self.config.lock_backoff).await;
            }
        }

        Err(LedgerError::LockTimeout {
            account,
            attempts: self.config.lock_attempts,
        })
    }

    async fn atomic_increment_balance(&self, account: AccountId, delta: i64, ctx: &WorkerContext) -> Result<i64> {
        let balance = self.state.lock()?.increment_balance(account, delta)?;
        tracing::debug!(worker = ctx.index(), account = %account, delta, balance, "balance incremented");
        Ok(balance)
    }

    fn register_on_create(&self, account: AccountId, callback: CreateCallback) -> Result<()> {
        self.hub.register_on_create(account, callback)
    }

    fn register_on_touch(&self, account: AccountId, callback: TouchCallback) -> Result<()> {
        self.hub.register_on_touch(account, callback)
    }

    fn clear_callbacks(&self, account: AccountId) -> Result<()> {
        self.hub.clear(account)
    }

    async fn touch(&self, account: AccountId, ctx: &WorkerContext) -> Result<()> {
        self.state.lock()?.touch(account)?;
        self.hub
            .fire_touch(TouchNotice {
                account,
                worker: *ctx,
            })
            .await
    }

    async fn settle_touches(&self) -> Result<()> {
        self.hub.settle().await
    }

    async fn record_event(&self, account: AccountId, ctx: &WorkerContext, kind: TraceKind) -> Result<TraceEvent> {
        self.state.lock()?.record_event(account, ctx, kind)
    }

    async fn trace(&self, account: AccountId) -> Result<Vec<TraceEvent>> {
        Ok(self.state.lock()?.trace(account))
    }

    async fn clear_trace(&self, account: AccountId) -> Result<()> {
        self.state.lock()?.clear_trace(account);
        Ok(())
    }
}
