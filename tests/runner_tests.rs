/// Runner tests
///
/// Baseline ordering, stop policies, failure classification and reset.
/// Run with: cargo test --test runner_tests
mod common;

use common::{ACCOUNT, ScriptedStore};
use ledger_race::{
    BalanceStrategyKind, Classification, DelayPolicy, ExecutionKind, LedgerError, LedgerStore,
    MemoryLedgerStore, Report, Runner, StopPolicy, StoreConfig, Summary,
};
use std::sync::Arc;
use std::time::Duration;

fn memory_runner(delay: DelayPolicy, stop: StopPolicy) -> Runner {
    Runner::new(Arc::new(MemoryLedgerStore::default()))
        .delay(Arc::new(delay))
        .stop(stop)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_weak_strategy_runs_every_trial_under_auto() {
    let results = memory_runner(DelayPolicy::None, StopPolicy::Auto)
        .compare(ExecutionKind::SharedMemory, BalanceStrategyKind::SumAll, 4, 100, 5)
        .await
        .unwrap();

    assert_eq!(results.len(), 6);
    assert!(results[0].is_baseline());
    assert_eq!(results[0].execution, ExecutionKind::Sequential);
    assert!(
        results[1..]
            .iter()
            .all(|r| r.execution == ExecutionKind::SharedMemory)
    );
    assert_eq!(
        results.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![0, 1, 2, 3, 4, 5]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_on_race_stops_at_first_race() {
    let results = memory_runner(DelayPolicy::fixed(Duration::from_millis(50)), StopPolicy::OnRace)
        .compare(ExecutionKind::SharedMemory, BalanceStrategyKind::Naive, 4, 100, 5)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[1].classification, Classification::RaceObserved);
    assert!(Summary::from_results(&results).passed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_save_is_partial_and_siblings_are_joined() {
    let store: Arc<dyn LedgerStore> =
        Arc::new(ScriptedStore::new(StoreConfig::memory()).failing_writes_for(1));
    let runner = Runner::new(store)
        .delay(Arc::new(DelayPolicy::None))
        .stop(StopPolicy::Never);

    let results = runner
        .compare(ExecutionKind::SharedMemory, BalanceStrategyKind::Locked, 4, 100, 1)
        .await
        .unwrap();

    for trial in &results {
        assert_eq!(trial.classification, Classification::Failed, "{}", trial);
        assert_eq!(trial.entries_count, 4);
        assert_eq!(trial.failures.len(), 1);
        assert_eq!(trial.failures[0].worker, Some(1));
        assert!(trial.has_partial_operation());
        match &trial.failures[0].error {
            LedgerError::PartialOperation { worker, source, .. } => {
                assert_eq!(*worker, 1);
                assert!(matches!(**source, LedgerError::StoreUnavailable(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(trial.entries_sum, 400);
    }

    let summary = Summary::from_results(&results);
    assert_eq!(summary.failed, 2);
    assert!(!summary.passed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lock_timeout_marks_trial_failed_and_run_continues() {
    let store: Arc<dyn LedgerStore> = Arc::new(MemoryLedgerStore::new(
        StoreConfig::memory()
            .lock_attempts(1)
            .lock_backoff(Duration::from_millis(1)),
    ));
    let results = Runner::new(store)
        .delay(Arc::new(DelayPolicy::fixed(Duration::from_millis(30))))
        .stop(StopPolicy::Auto)
        .compare(ExecutionKind::SharedMemory, BalanceStrategyKind::Locked, 3, 100, 2)
        .await
        .unwrap();

    assert_eq!(results[0].classification, Classification::Correct);
    assert_eq!(results.len(), 3);
    for trial in &results[1..] {
        assert_eq!(trial.classification, Classification::Failed);
        assert_eq!(trial.entries_count, 3);
        assert!(trial.failures.iter().all(|failure| matches!(
            &failure.error,
            LedgerError::PartialOperation { source, .. }
                if matches!(**source, LedgerError::LockTimeout { attempts: 1, .. })
        )));
    }
}

#[tokio::test]
async fn test_reset_between_trials_is_idempotent() {
    let runner = memory_runner(DelayPolicy::None, StopPolicy::Never);

    for _ in 0..3 {
        let results = runner
            .compare(ExecutionKind::Sequential, BalanceStrategyKind::Naive, 3, 100, 2)
            .await
            .unwrap();
        for trial in &results {
            assert_eq!(trial.final_balance, 300);
            assert_eq!(trial.entries_count, 3);
            assert_eq!(trial.trace.len(), 9);
        }
    }

    runner.reset().await.unwrap();
    runner.reset().await.unwrap();
    let account = runner.store().account(ACCOUNT).await.unwrap();
    assert_eq!((account.balance, account.entries_count), (0, 0));
    assert!(runner.store().entries(ACCOUNT).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_json_report_round_trips() {
    let results = memory_runner(DelayPolicy::None, StopPolicy::Auto)
        .compare(ExecutionKind::Sequential, BalanceStrategyKind::Atomic, 2, 100, 3)
        .await
        .unwrap();
    let report = Report::new(results);

    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"CORRECT\""));
    let decoded: Report = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded.summary, report.summary);
    assert_eq!(decoded.results.len(), 2);
}

#[tokio::test]
async fn test_failed_read_back_marks_only_that_trial_failed() {
    let store: Arc<dyn LedgerStore> =
        Arc::new(ScriptedStore::new(StoreConfig::memory()).failing_account_reads(1));
    let results = Runner::new(store)
        .delay(Arc::new(DelayPolicy::None))
        .stop(StopPolicy::Never)
        .compare(ExecutionKind::Sequential, BalanceStrategyKind::Atomic, 2, 100, 2)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].classification, Classification::Failed);
    assert_eq!(results[0].failures.len(), 1);
    assert_eq!(results[0].failures[0].worker, None);
    assert!(matches!(results[0].failures[0].error, LedgerError::StoreUnavailable(_)));
    for trial in &results[1..] {
        assert_eq!(trial.classification, Classification::Correct, "{}", trial);
        assert_eq!(trial.final_balance, 200);
    }
}

#[tokio::test]
async fn test_failed_reset_skips_execution_and_run_continues() {
    let store: Arc<dyn LedgerStore> =
        Arc::new(ScriptedStore::new(StoreConfig::memory()).failing_entry_clears(2));
    let results = Runner::new(store)
        .delay(Arc::new(DelayPolicy::None))
        .stop(StopPolicy::Never)
        .compare(ExecutionKind::Sequential, BalanceStrategyKind::Naive, 3, 100, 2)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    for trial in &results[..2] {
        assert_eq!(trial.classification, Classification::Failed);
        assert_eq!(trial.entries_count, 0);
        assert!(trial.trace.is_empty());
    }
    assert_eq!(results[2].classification, Classification::Correct);
    assert_eq!(results[2].final_balance, 300);
    assert_eq!(Summary::from_results(&results).failed, 2);
}

#[tokio::test]
async fn test_overflowing_workload_is_rejected() {
    let err = ledger_race::compare_in_memory(
        ExecutionKind::Sequential,
        BalanceStrategyKind::Atomic,
        2,
        i64::MAX,
        0,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidConfiguration(_)));
}
