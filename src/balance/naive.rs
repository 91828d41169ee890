use super::{BalanceStrategyKind, BalanceUpdate, BalanceUpdateStrategy};
use crate::core::trace::{self, TraceKind};
use crate::core::{Entry, LedgerError, Result, WorkerContext};
use crate::delay::Delay;
use crate::storage::LedgerStore;
use async_trait::async_trait;

/// Read the stored balance, add the new entry, write the result back.
///
/// Two workers reading the same balance before either writes will both
/// save `old + amount`, so one increment is lost.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveDeltaRecompute;

#[async_trait]
impl BalanceUpdateStrategy for NaiveDeltaRecompute {
    fn kind(&self) -> BalanceStrategyKind {
        BalanceStrategyKind::Naive
    }

    async fn apply(
        &self,
        ctx: &WorkerContext,
        store: &dyn LedgerStore,
        entry: &Entry,
        delay: &dyn Delay,
    ) -> Result<BalanceUpdate> {
        let account = entry.account_id;
        let balance = store
            .get_balance(account)
            .await?
            .checked_add(entry.amount)
            .ok_or(LedgerError::BalanceOverflow { account })?;
        trace::emit(store, ctx, account, TraceKind::BalanceCalculated { balance }).await?;

        delay.pause(ctx).await;

        store.set_balance(account, balance, ctx).await?;
        trace::emit(store, ctx, account, TraceKind::BalanceSaved { balance }).await?;
        Ok(BalanceUpdate::Saved { balance })
    }
}
