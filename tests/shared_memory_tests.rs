/// Shared-memory execution tests
///
/// Workers are tasks sharing one store handle. Weak strategies are driven
/// through a controlled interleaving; strong ones are repeated under random
/// delays.
/// Run with: cargo test --test shared_memory_tests
mod common;

use common::{
    ACCOUNT, BarrierDelay, LastWriterDelay, ScriptedStore, assert_critical_sections_disjoint,
};
use ledger_race::balance;
use ledger_race::{
    BalanceStrategyKind, Classification, Delay, DelayPolicy, ExecutionKind, ExecutionStrategy,
    LedgerStore, MemoryLedgerStore, Runner, SharedMemoryParallel, StopPolicy, StoreConfig,
    Workload,
};
use std::sync::Arc;

async fn fresh_store() -> Arc<dyn LedgerStore> {
    let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::default());
    store.ensure_account(ACCOUNT).await.unwrap();
    store
}

async fn run_shared(
    store: &Arc<dyn LedgerStore>,
    kind: BalanceStrategyKind,
    workers: usize,
    delay: Arc<dyn Delay>,
) -> i64 {
    let workload = Workload::new(ACCOUNT, 100, workers, balance::build(kind), delay);
    SharedMemoryParallel.run(store, &workload).await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_naive_loses_updates_when_all_reads_precede_writes() {
    let store = fresh_store().await;

    let balance = run_shared(
        &store,
        BalanceStrategyKind::Naive,
        4,
        Arc::new(BarrierDelay::new(4)),
    )
    .await;

    assert_eq!(balance, 100);
    assert_eq!(store.account(ACCOUNT).await.unwrap().entries_count, 4);
    assert_eq!(store.sum_entries(ACCOUNT).await.unwrap(), 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_recompute_strategies_lose_updates_to_a_stale_last_writer() {
    for kind in [
        BalanceStrategyKind::SumAll,
        BalanceStrategyKind::SumLoaded,
        BalanceStrategyKind::TouchCascade,
    ] {
        let scripted = Arc::new(ScriptedStore::new(StoreConfig::memory()).gated());
        let store: Arc<dyn LedgerStore> = scripted.clone();
        store.ensure_account(ACCOUNT).await.unwrap();

        let balance = run_shared(&store, kind, 4, Arc::new(LastWriterDelay::new(scripted, 4))).await;

        assert_eq!(balance, 100, "{}", kind);
        assert_eq!(store.account(ACCOUNT).await.unwrap().entries_count, 4, "{}", kind);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_atomic_increment_is_always_correct() {
    let store = fresh_store().await;
    let balance = run_shared(
        &store,
        BalanceStrategyKind::Atomic,
        4,
        Arc::new(BarrierDelay::new(4)),
    )
    .await;
    assert_eq!(balance, 400);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_converging_strategies_hold_over_fifty_trials() {
    for kind in [
        BalanceStrategyKind::Locked,
        BalanceStrategyKind::LockedCascade,
        BalanceStrategyKind::LockedFull,
        BalanceStrategyKind::Atomic,
    ] {
        let runner = Runner::new(fresh_store().await)
            .delay(Arc::new(DelayPolicy::Choice {
                millis: vec![0, 1, 2, 5],
            }))
            .stop(StopPolicy::Never);

        let results = runner
            .compare(ExecutionKind::SharedMemory, kind, 4, 100, 50)
            .await
            .unwrap();

        assert_eq!(results.len(), 51);
        for result in &results {
            assert_eq!(result.classification, Classification::Correct, "{}:\n{}", kind, result);
            assert_eq!(result.final_balance, 400);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_locked_critical_sections_never_interleave() {
    for kind in [
        BalanceStrategyKind::Locked,
        BalanceStrategyKind::LockedCascade,
        BalanceStrategyKind::LockedFull,
    ] {
        let store = fresh_store().await;
        let balance = run_shared(
            &store,
            kind,
            5,
            Arc::new(DelayPolicy::Choice {
                millis: vec![1, 3, 5],
            }),
        )
        .await;
        assert_eq!(balance, 500);

        let trace = store.trace(ACCOUNT).await.unwrap();
        assert_critical_sections_disjoint(&trace);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_weak_strategy_reports_race_not_failure() {
    let runner = Runner::new(fresh_store().await)
        .delay(Arc::new(DelayPolicy::fixed(std::time::Duration::from_millis(50))))
        .stop(StopPolicy::Never);

    let results = runner
        .compare(ExecutionKind::SharedMemory, BalanceStrategyKind::Naive, 4, 100, 2)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].classification, Classification::Correct);
    for trial in &results[1..] {
        assert_eq!(trial.classification, Classification::RaceObserved, "{}", trial);
        assert!(trial.failures.is_empty());
        assert_eq!(trial.entries_count, 4);
        assert!(trial.final_balance < 400);
    }
}
