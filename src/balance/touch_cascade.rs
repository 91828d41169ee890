use super::{
    BalanceStrategyKind, BalanceUpdate, BalanceUpdateStrategy, SumSource, recompute_from_entries,
};
use crate::core::{AccountId, Entry, LedgerError, Result, WorkerContext};
use crate::delay::Delay;
use crate::storage::{LedgerStore, TouchCallback, TouchNotice, with_exclusive_lock};
use async_trait::async_trait;
use futures::FutureExt;
use std::sync::{Arc, Weak};

/// Touch the account and let the registered `on_touch` callback recompute.
///
/// The unlocked variant races exactly like a direct recompute; the locked
/// one takes the account lock inside the callback.
#[derive(Debug, Clone, Copy)]
pub struct TouchCascadeRecompute {
    locked: bool,
}

impl TouchCascadeRecompute {
    pub fn unlocked() -> Self {
        Self { locked: false }
    }

    pub fn locked() -> Self {
        Self { locked: true }
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}

async fn cascade(
    store: Weak<dyn LedgerStore>,
    notice: TouchNotice,
    delay: Arc<dyn Delay>,
    locked: bool,
) -> Result<()> {
    let store = store
        .upgrade()
        .ok_or_else(|| LedgerError::StoreUnavailable("store connection closed".to_string()))?;
    let store = store.as_ref();
    let ctx = &notice.worker;
    let account = notice.account;
    let delay = delay.as_ref();

    if locked {
        with_exclusive_lock(store, account, ctx, move || {
            recompute_from_entries(ctx, store, account, delay, SumSource::Store)
        })
        .await?;
    } else {
        recompute_from_entries(ctx, store, account, delay, SumSource::Store).await?;
    }
    Ok(())
}

#[async_trait]
impl BalanceUpdateStrategy for TouchCascadeRecompute {
    fn kind(&self) -> BalanceStrategyKind {
        if self.locked {
            BalanceStrategyKind::LockedCascade
        } else {
            BalanceStrategyKind::TouchCascade
        }
    }

    async fn prepare(
        &self,
        store: &Arc<dyn LedgerStore>,
        account: AccountId,
        delay: Arc<dyn Delay>,
    ) -> Result<()> {
        let weak = Arc::downgrade(store);
        let locked = self.locked;
        let callback: TouchCallback = Arc::new(move |notice: TouchNotice| {
            cascade(weak.clone(), notice, delay.clone(), locked).boxed()
        });
        store.register_on_touch(account, callback)
    }

    async fn apply(
        &self,
        ctx: &WorkerContext,
        store: &dyn LedgerStore,
        entry: &Entry,
        _delay: &dyn Delay,
    ) -> Result<BalanceUpdate> {
        store.touch(entry.account_id, ctx).await?;
        Ok(BalanceUpdate::Cascaded)
    }
}
