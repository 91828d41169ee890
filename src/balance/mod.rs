//! Balance update strategies.
//!
//! Each strategy turns one freshly persisted entry into an updated account
//! balance. The weak ones (`naive`, `sum-all`, `sum-loaded`,
//! `touch-cascade`) read, pause and write without coordination and lose
//! updates under contention; the strong ones serialise through the account
//! lock or use a commutative increment.

pub mod atomic;
pub mod locked;
pub mod naive;
pub mod sum_all;
pub mod touch_cascade;

pub use atomic::AtomicIncrement;
pub use locked::{LockedFullOperation, LockedRecompute};
pub use naive::NaiveDeltaRecompute;
pub use sum_all::{SumAllEntriesRecompute, SumSource};
pub use touch_cascade::TouchCascadeRecompute;

use crate::core::trace::{self, TraceKind};
use crate::core::{AccountId, Entry, LedgerError, Result, WorkerContext, checked_total};
use crate::delay::Delay;
use crate::storage::LedgerStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BalanceStrategyKind {
    /// Read balance, add the entry amount, write back
    Naive,
    /// Recompute from the store's sum of entries
    SumAll,
    /// Recompute by loading every entry and summing in the worker
    SumLoaded,
    /// Touch the account and let the `on_touch` callback recompute
    TouchCascade,
    /// Recompute while holding the account lock
    Locked,
    /// Touch cascade whose recompute holds the account lock
    LockedCascade,
    /// Hold the account lock across entry creation and recompute
    LockedFull,
    /// Atomic add of the entry amount
    Atomic,
}

impl BalanceStrategyKind {
    pub const ALL: [Self; 8] = [
        Self::Naive,
        Self::SumAll,
        Self::SumLoaded,
        Self::TouchCascade,
        Self::Locked,
        Self::LockedCascade,
        Self::LockedFull,
        Self::Atomic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Naive => "naive",
            Self::SumAll => "sum-all",
            Self::SumLoaded => "sum-loaded",
            Self::TouchCascade => "touch-cascade",
            Self::Locked => "locked",
            Self::LockedCascade => "locked-cascade",
            Self::LockedFull => "locked-full",
            Self::Atomic => "atomic",
        }
    }

    /// Whether concurrent workers always converge on the ledger sum.
    pub fn guarantees_convergence(&self) -> bool {
        matches!(
            self,
            Self::Locked | Self::LockedCascade | Self::LockedFull | Self::Atomic
        )
    }
}

impl fmt::Display for BalanceStrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a worker's update did to the balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceUpdate {
    /// An absolute value was written.
    Saved { balance: i64 },
    /// The stored value was incremented in place.
    Incremented { delta: i64, balance: i64 },
    /// The recompute was handed to a touch cascade.
    Cascaded,
}

#[async_trait]
pub trait BalanceUpdateStrategy: Send + Sync {
    fn kind(&self) -> BalanceStrategyKind;

    fn guarantees_convergence(&self) -> bool {
        self.kind().guarantees_convergence()
    }

    /// Hook run once per store connection before any worker starts.
    async fn prepare(
        &self,
        _store: &Arc<dyn LedgerStore>,
        _account: AccountId,
        _delay: Arc<dyn Delay>,
    ) -> Result<()> {
        Ok(())
    }

    /// Update the balance for an entry that is already persisted.
    async fn apply(
        &self,
        ctx: &WorkerContext,
        store: &dyn LedgerStore,
        entry: &Entry,
        delay: &dyn Delay,
    ) -> Result<BalanceUpdate>;

    /// One worker's whole operation: create the entry, then apply.
    async fn run_worker(
        &self,
        ctx: &WorkerContext,
        store: &dyn LedgerStore,
        account: AccountId,
        amount: i64,
        delay: &dyn Delay,
    ) -> Result<BalanceUpdate> {
        let entry = store.create_entry(account, amount, ctx).await?;
        self.apply(ctx, store, &entry, delay)
            .await
            .map_err(|err| partial_operation(ctx, &entry, err))
    }
}

pub fn build(kind: BalanceStrategyKind) -> Arc<dyn BalanceUpdateStrategy> {
    match kind {
        BalanceStrategyKind::Naive => Arc::new(NaiveDeltaRecompute),
        BalanceStrategyKind::SumAll => Arc::new(SumAllEntriesRecompute::new(SumSource::Store)),
        BalanceStrategyKind::SumLoaded => Arc::new(SumAllEntriesRecompute::new(SumSource::Loaded)),
        BalanceStrategyKind::TouchCascade => Arc::new(TouchCascadeRecompute::unlocked()),
        BalanceStrategyKind::Locked => Arc::new(LockedRecompute),
        BalanceStrategyKind::LockedCascade => Arc::new(TouchCascadeRecompute::locked()),
        BalanceStrategyKind::LockedFull => Arc::new(LockedFullOperation),
        BalanceStrategyKind::Atomic => Arc::new(AtomicIncrement),
    }
}

pub(crate) fn partial_operation(ctx: &WorkerContext, entry: &Entry, err: LedgerError) -> LedgerError {
    LedgerError::PartialOperation {
        worker: ctx.index(),
        entry: entry.id,
        source: Box::new(err),
    }
}

/// Read the ledger total, pause, then overwrite the balance with it.
pub(crate) async fn recompute_from_entries(
    ctx: &WorkerContext,
    store: &dyn LedgerStore,
    account: AccountId,
    delay: &dyn Delay,
    source: SumSource,
) -> Result<i64> {
    let balance = match source {
        SumSource::Store => store.sum_entries(account).await?,
        SumSource::Loaded => {
            let entries = store.entries(account).await?;
            checked_total(account, entries.iter().map(|entry| entry.amount))?
        }
    };
    trace::emit(store, ctx, account, TraceKind::BalanceCalculated { balance }).await?;

    delay.pause(ctx).await;

    store.set_balance(account, balance, ctx).await?;
    trace::emit(store, ctx, account, TraceKind::BalanceSaved { balance }).await?;
    Ok(balance)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convergence_classes() {
        let strong: Vec<_> = BalanceStrategyKind::ALL
            .iter()
            .filter(|kind| kind.guarantees_convergence())
            .map(|kind| kind.as_str())
            .collect();
        assert_eq!(strong, vec!["locked", "locked-cascade", "locked-full", "atomic"]);
    }

    #[test]
    fn test_build_matches_kind() {
        for kind in BalanceStrategyKind::ALL {
            assert_eq!(build(kind).kind(), kind);
        }
    }

    #[test]
    fn test_value_enum_names() {
        use clap::ValueEnum;
        for kind in BalanceStrategyKind::ALL {
            assert_eq!(BalanceStrategyKind::from_str(kind.as_str(), false), Ok(kind));
        }
    }
}
