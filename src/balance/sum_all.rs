use super::{BalanceStrategyKind, BalanceUpdate, BalanceUpdateStrategy, recompute_from_entries};
use crate::core::{Entry, Result, WorkerContext};
use crate::delay::Delay;
use crate::storage::LedgerStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Where the ledger total comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SumSource {
    /// Aggregate computed by the store.
    Store,
    /// Entries loaded into the worker and summed there.
    Loaded,
}

/// Recompute the balance from the full ledger, then write it.
///
/// Recomputing does not help on its own: a worker that sums before a
/// sibling's entry commits still overwrites the newer total after its pause.
#[derive(Debug, Clone, Copy)]
pub struct SumAllEntriesRecompute {
    source: SumSource,
}

impl SumAllEntriesRecompute {
    pub fn new(source: SumSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> SumSource {
        self.source
    }
}

#[async_trait]
impl BalanceUpdateStrategy for SumAllEntriesRecompute {
    fn kind(&self) -> BalanceStrategyKind {
        match self.source {
            SumSource::Store => BalanceStrategyKind::SumAll,
            SumSource::Loaded => BalanceStrategyKind::SumLoaded,
        }
    }

    async fn apply(
        &self,
        ctx: &WorkerContext,
        store: &dyn LedgerStore,
        entry: &Entry,
        delay: &dyn Delay,
    ) -> Result<BalanceUpdate> {
        let balance = recompute_from_entries(ctx, store, entry.account_id, delay, self.source).await?;
        Ok(BalanceUpdate::Saved { balance })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AccountId, LedgerError};
    use crate::delay::DelayPolicy;
    use crate::storage::MemoryLedgerStore;

    #[tokio::test]
    async fn test_recompute_repairs_a_stale_balance() {
        for source in [SumSource::Store, SumSource::Loaded] {
            let store = MemoryLedgerStore::default();
            let account = AccountId(1);
            let ctx = WorkerContext::new(0);
            store.ensure_account(account).await.unwrap();
            store.create_entry(account, 30, &ctx).await.unwrap();
            store.set_balance(account, 999, &ctx).await.unwrap();

            SumAllEntriesRecompute::new(source)
                .run_worker(&ctx, &store, account, 100, &DelayPolicy::None)
                .await
                .unwrap();

            assert_eq!(store.get_balance(account).await.unwrap(), 130);
        }
    }

    #[tokio::test]
    async fn test_overflowing_ledger_fails_both_sources() {
        for source in [SumSource::Store, SumSource::Loaded] {
            let store = MemoryLedgerStore::default();
            let account = AccountId(1);
            let ctx = WorkerContext::new(0);
            store.ensure_account(account).await.unwrap();
            store.create_entry(account, i64::MAX, &ctx).await.unwrap();

            let err = SumAllEntriesRecompute::new(source)
                .run_worker(&ctx, &store, account, 1, &DelayPolicy::None)
                .await
                .unwrap_err();

            assert!(err.is_partial(), "{:?}", source);
            assert!(matches!(
                err,
                LedgerError::PartialOperation { ref source, .. }
                    if **source == LedgerError::BalanceOverflow { account }
            ));
        }
    }
}
