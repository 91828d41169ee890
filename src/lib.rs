// ============================================================================
// ledger-race Library
// ============================================================================

pub mod balance;
pub mod core;
pub mod delay;
pub mod execution;
pub mod runner;
pub mod storage;

// Re-export main types for convenience
pub use core::{
    Account, AccountId, Entry, EntryId, LedgerError, Result, TraceEvent, TraceKind,
    WorkerContext, WorkerFailure,
};
pub use delay::{Delay, DelayPolicy};

pub use balance::{BalanceStrategyKind, BalanceUpdate, BalanceUpdateStrategy};
pub use execution::{
    ExecutionKind, ExecutionStrategy, IsolatedMemoryParallel, Sequential, SharedMemoryParallel,
    Workload,
};
pub use runner::{Classification, Report, Runner, StopPolicy, Summary, TrialResult};
pub use storage::{
    FileLedgerStore, LedgerStore, MemoryLedgerStore, StoreBackend, StoreConfig, TouchMode,
    open_store, with_exclusive_lock,
};

// ============================================================================
// Quick comparison
// ============================================================================

/// Run one comparison on a fresh in-memory store.
///
/// # Examples
///
/// ```no_run
/// use ledger_race::{BalanceStrategyKind, Classification, ExecutionKind};
///
/// # async fn demo() -> ledger_race::Result<()> {
/// let results = ledger_race::compare_in_memory(
///     ExecutionKind::SharedMemory,
///     BalanceStrategyKind::Naive,
///     4,
///     100,
///     5,
/// )
/// .await?;
///
/// assert_eq!(results[0].classification, Classification::Correct);
/// # Ok(())
/// # }
/// ```
pub async fn compare_in_memory(
    execution: ExecutionKind,
    balance: BalanceStrategyKind,
    workers: usize,
    amount: i64,
    trials: usize,
) -> Result<Vec<TrialResult>> {
    let store = open_store(StoreConfig::memory()).await?;
    Runner::new(store)
        .compare(execution, balance, workers, amount, trials)
        .await
}
