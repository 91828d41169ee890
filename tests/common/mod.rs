//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use ledger_race::storage::{AccountLock, CreateCallback, TouchCallback};
use ledger_race::{
    Account, AccountId, Delay, Entry, LedgerError, LedgerStore, MemoryLedgerStore, Result,
    StoreConfig, TraceEvent, TraceKind, WorkerContext,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{Barrier, watch};

pub const ACCOUNT: AccountId = AccountId(1);

/// In-memory store with scripted faults.
///
/// Workers other than 0 block in `create_entry` until the gate opens, and
/// writes from `failing_worker` fail with `StoreUnavailable`. The next
/// `failing_reads` account reads and `failing_clears` entry deletions fail
/// too.
pub struct ScriptedStore {
    inner: MemoryLedgerStore,
    gate: watch::Sender<bool>,
    failing_worker: Option<usize>,
    failing_reads: AtomicUsize,
    failing_clears: AtomicUsize,
}

impl ScriptedStore {
    pub fn new(config: StoreConfig) -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            inner: MemoryLedgerStore::new(config),
            gate,
            failing_worker: None,
            failing_reads: AtomicUsize::new(0),
            failing_clears: AtomicUsize::new(0),
        }
    }

    /// Hold back entry creation of every worker but 0.
    pub fn gated(self) -> Self {
        self.gate.send_replace(false);
        self
    }

    pub fn failing_writes_for(mut self, worker: usize) -> Self {
        self.failing_worker = Some(worker);
        self
    }

    pub fn failing_account_reads(self, count: usize) -> Self {
        self.failing_reads.store(count, Ordering::SeqCst);
        self
    }

    pub fn failing_entry_clears(self, count: usize) -> Self {
        self.failing_clears.store(count, Ordering::SeqCst);
        self
    }

    pub fn open_gate(&self) {
        self.gate.send_replace(true);
    }

    fn check_write(&self, ctx: &WorkerContext) -> Result<()> {
        if self.failing_worker == Some(ctx.index()) {
            return Err(LedgerError::StoreUnavailable(format!(
                "scripted write failure for worker {}",
                ctx.index()
            )));
        }
        Ok(())
    }
}

fn take_fault(remaining: &AtomicUsize, what: &str) -> Result<()> {
    match remaining.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1)) {
        Ok(_) => Err(LedgerError::StoreUnavailable(format!("scripted {} failure", what))),
        Err(_) => Ok(()),
    }
}

#[async_trait]
impl LedgerStore for ScriptedStore {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn config(&self) -> &StoreConfig {
        self.inner.config()
    }

    async fn ensure_account(&self, account: AccountId) -> Result<Account> {
        self.inner.ensure_account(account).await
    }

    async fn account(&self, account: AccountId) -> Result<Account> {
        take_fault(&self.failing_reads, "account read")?;
        self.inner.account(account).await
    }

    async fn create_entry(&self, account: AccountId, amount: i64, ctx: &WorkerContext) -> Result<Entry> {
        if ctx.index() > 0 {
            let mut gate = self.gate.subscribe();
            gate.wait_for(|open| *open)
                .await
                .map_err(|err| LedgerError::StoreUnavailable(err.to_string()))?;
        }
        self.inner.create_entry(account, amount, ctx).await
    }

    async fn entries(&self, account: AccountId) -> Result<Vec<Entry>> {
        self.inner.entries(account).await
    }

    async fn delete_all_entries(&self, account: AccountId) -> Result<()> {
        take_fault(&self.failing_clears, "entry clear")?;
        self.inner.delete_all_entries(account).await
    }

    async fn set_balance(&self, account: AccountId, value: i64, ctx: &WorkerContext) -> Result<()> {
        self.check_write(ctx)?;
        self.inner.set_balance(account, value, ctx).await
    }

    async fn get_balance(&self, account: AccountId) -> Result<i64> {
        self.inner.get_balance(account).await
    }

    async fn sum_entries(&self, account: AccountId) -> Result<i64> {
        self.inner.sum_entries(account).await
    }

    async fn acquire_exclusive_lock(&self, account: AccountId, ctx: &WorkerContext) -> Result<AccountLock> {
        self.inner.acquire_exclusive_lock(account, ctx).await
    }

    async fn atomic_increment_balance(&self, account: AccountId, delta: i64, ctx: &WorkerContext) -> Result<i64> {
        self.check_write(ctx)?;
        self.inner.atomic_increment_balance(account, delta, ctx).await
    }

    fn register_on_create(&self, account: AccountId, callback: CreateCallback) -> Result<()> {
        self.inner.register_on_create(account, callback)
    }

    fn register_on_touch(&self, account: AccountId, callback: TouchCallback) -> Result<()> {
        self.inner.register_on_touch(account, callback)
    }

    fn clear_callbacks(&self, account: AccountId) -> Result<()> {
        self.inner.clear_callbacks(account)
    }

    async fn touch(&self, account: AccountId, ctx: &WorkerContext) -> Result<()> {
        self.inner.touch(account, ctx).await
    }

    async fn settle_touches(&self) -> Result<()> {
        self.inner.settle_touches().await
    }

    async fn record_event(&self, account: AccountId, ctx: &WorkerContext, kind: TraceKind) -> Result<TraceEvent> {
        self.inner.record_event(account, ctx, kind).await
    }

    async fn trace(&self, account: AccountId) -> Result<Vec<TraceEvent>> {
        self.inner.trace(account).await
    }

    async fn clear_trace(&self, account: AccountId) -> Result<()> {
        self.inner.clear_trace(account).await
    }
}

/// Every worker waits for all the others, so every read happens before
/// any write.
pub struct BarrierDelay {
    barrier: Barrier,
}

impl BarrierDelay {
    pub fn new(workers: usize) -> Self {
        Self {
            barrier: Barrier::new(workers),
        }
    }
}

#[async_trait]
impl Delay for BarrierDelay {
    async fn pause(&self, _ctx: &WorkerContext) {
        self.barrier.wait().await;
    }
}

/// Worker 0 computes first, lets the others in, and saves only after all
/// of them have saved, so its stale value is the last write.
pub struct LastWriterDelay {
    store: Arc<ScriptedStore>,
    others: usize,
}

impl LastWriterDelay {
    pub fn new(store: Arc<ScriptedStore>, workers: usize) -> Self {
        Self {
            store,
            others: workers - 1,
        }
    }

    async fn saved_by_others(&self) -> usize {
        self.store
            .trace(ACCOUNT)
            .await
            .unwrap_or_default()
            .iter()
            .filter(|event| event.worker != 0)
            .filter(|event| matches!(event.kind, TraceKind::BalanceSaved { .. }))
            .count()
    }
}

#[async_trait]
impl Delay for LastWriterDelay {
    async fn pause(&self, ctx: &WorkerContext) {
        if ctx.index() != 0 {
            return;
        }
        self.store.open_gate();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while self.saved_by_others().await < self.others && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

/// Balance-step events between a `LockAcquired` and its `LockReleased` all
/// belong to the lock holder, and critical sections never nest.
pub fn assert_critical_sections_disjoint(trace: &[TraceEvent]) {
    let mut holder: Option<usize> = None;

    for event in trace {
        match event.kind {
            TraceKind::LockAcquired => {
                assert_eq!(holder, None, "lock acquired while held: {}", event);
                holder = Some(event.worker);
            }
            TraceKind::LockReleased => {
                assert_eq!(holder, Some(event.worker), "release by non-holder: {}", event);
                holder = None;
            }
            TraceKind::BalanceCalculated { .. } | TraceKind::BalanceSaved { .. } => {
                assert_eq!(holder, Some(event.worker), "balance step outside its lock: {}", event);
            }
            TraceKind::EntryCreated { .. } | TraceKind::BalanceIncremented { .. } => {}
        }
    }
    assert_eq!(holder, None, "lock never released");
}
