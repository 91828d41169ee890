use super::{
    BalanceStrategyKind, BalanceUpdate, BalanceUpdateStrategy, SumSource, partial_operation,
    recompute_from_entries,
};
use crate::core::{AccountId, Entry, Result, WorkerContext};
use crate::delay::Delay;
use crate::storage::{LedgerStore, with_exclusive_lock};
use async_trait::async_trait;

/// Recompute from the ledger sum while holding the account lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockedRecompute;

async fn locked_recompute(
    ctx: &WorkerContext,
    store: &dyn LedgerStore,
    account: AccountId,
    delay: &dyn Delay,
) -> Result<i64> {
    with_exclusive_lock(store, account, ctx, move || {
        recompute_from_entries(ctx, store, account, delay, SumSource::Store)
    })
    .await
}

#[async_trait]
impl BalanceUpdateStrategy for LockedRecompute {
    fn kind(&self) -> BalanceStrategyKind {
        BalanceStrategyKind::Locked
    }

    async fn apply(
        &self,
        ctx: &WorkerContext,
        store: &dyn LedgerStore,
        entry: &Entry,
        delay: &dyn Delay,
    ) -> Result<BalanceUpdate> {
        let balance = locked_recompute(ctx, store, entry.account_id, delay).await?;
        Ok(BalanceUpdate::Saved { balance })
    }
}

/// Hold the account lock across entry creation and recompute.
///
/// A lock timeout here leaves nothing behind, unlike [`LockedRecompute`]
/// where the entry is already committed when the lock is requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockedFullOperation;

#[async_trait]
impl BalanceUpdateStrategy for LockedFullOperation {
    fn kind(&self) -> BalanceStrategyKind {
        BalanceStrategyKind::LockedFull
    }

    async fn apply(
        &self,
        ctx: &WorkerContext,
        store: &dyn LedgerStore,
        entry: &Entry,
        delay: &dyn Delay,
    ) -> Result<BalanceUpdate> {
        let balance = locked_recompute(ctx, store, entry.account_id, delay).await?;
        Ok(BalanceUpdate::Saved { balance })
    }

    async fn run_worker(
        &self,
        ctx: &WorkerContext,
        store: &dyn LedgerStore,
        account: AccountId,
        amount: i64,
        delay: &dyn Delay,
    ) -> Result<BalanceUpdate> {
        with_exclusive_lock(store, account, ctx, move || async move {
            let entry = store.create_entry(account, amount, ctx).await?;
            let balance = recompute_from_entries(ctx, store, account, delay, SumSource::Store)
                .await
                .map_err(|err| partial_operation(ctx, &entry, err))?;
            Ok(BalanceUpdate::Saved { balance })
        })
        .await
    }
}
