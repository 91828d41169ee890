use super::{BalanceStrategyKind, BalanceUpdate, BalanceUpdateStrategy};
use crate::core::trace::{self, TraceKind};
use crate::core::{Entry, Result, WorkerContext};
use crate::delay::Delay;
use crate::storage::LedgerStore;
use async_trait::async_trait;

/// Add the entry amount to the stored balance in one store operation.
///
/// Nothing is read before the write, so the pause cannot open a window.
#[derive(Debug, Clone, Copy, Default)]
pub struct AtomicIncrement;

#[async_trait]
impl BalanceUpdateStrategy for AtomicIncrement {
    fn kind(&self) -> BalanceStrategyKind {
        BalanceStrategyKind::Atomic
    }

    async fn apply(
        &self,
        ctx: &WorkerContext,
        store: &dyn LedgerStore,
        entry: &Entry,
        delay: &dyn Delay,
    ) -> Result<BalanceUpdate> {
        let account = entry.account_id;
        let delta = entry.amount;

        delay.pause(ctx).await;

        let balance = store.atomic_increment_balance(account, delta, ctx).await?;
        trace::emit(store, ctx, account, TraceKind::BalanceIncremented { delta, balance }).await?;
        Ok(BalanceUpdate::Incremented { delta, balance })
    }
}
