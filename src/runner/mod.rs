//! Trial runner: baseline first, then repeated trials with a reset between
//! each, classified against `workers * amount`.

pub mod report;

pub use report::{Classification, Report, Summary, TrialResult};

use crate::balance::{self, BalanceStrategyKind, BalanceUpdateStrategy};
use crate::core::{AccountId, LedgerError, Result, TraceEvent, WorkerContext, WorkerFailure};
use crate::delay::{Delay, DelayPolicy};
use crate::execution::{self, ExecutionKind, ExecutionStrategy, Sequential, Workload};
use crate::storage::LedgerStore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// When `compare` stops repeating trials.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StopPolicy {
    /// Stop after the first correct trial of a converging strategy
    #[default]
    Auto,
    /// Stop at the first trial that is not correct
    OnRace,
    /// Run every trial
    Never,
}

impl StopPolicy {
    pub fn should_stop(&self, result: &TrialResult, converges: bool) -> bool {
        match self {
            Self::Auto => converges && result.classification == Classification::Correct,
            Self::OnRace => result.classification != Classification::Correct,
            Self::Never => false,
        }
    }
}

impl fmt::Display for StopPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::OnRace => "on-race",
            Self::Never => "never",
        })
    }
}

pub struct Runner {
    store: Arc<dyn LedgerStore>,
    account: AccountId,
    delay: Arc<dyn Delay>,
    stop: StopPolicy,
    worker_binary: Option<PathBuf>,
}

impl Runner {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self {
            store,
            account: AccountId::default(),
            delay: Arc::new(DelayPolicy::default()),
            stop: StopPolicy::default(),
            worker_binary: None,
        }
    }

    pub fn account(mut self, account: AccountId) -> Self {
        self.account = account;
        self
    }

    pub fn delay(mut self, delay: Arc<dyn Delay>) -> Self {
        self.delay = delay;
        self
    }

    pub fn stop(mut self, stop: StopPolicy) -> Self {
        self.stop = stop;
        self
    }

    /// Program spawned by isolated-memory trials; defaults to the running
    /// executable.
    pub fn worker_binary(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_binary = Some(program.into());
        self
    }

    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Sequential baseline, then up to `trials` trials of `execution`.
    pub async fn compare(
        &self,
        execution: ExecutionKind,
        balance: BalanceStrategyKind,
        workers: usize,
        amount: i64,
        trials: usize,
    ) -> Result<Vec<TrialResult>> {
        let execution = execution::build(execution, self.worker_binary.clone())?;
        self.compare_with(execution.as_ref(), balance::build(balance), workers, amount, trials)
            .await
    }

    pub async fn compare_with(
        &self,
        execution: &dyn ExecutionStrategy,
        balance: Arc<dyn BalanceUpdateStrategy>,
        workers: usize,
        amount: i64,
        trials: usize,
    ) -> Result<Vec<TrialResult>> {
        let converges = balance.guarantees_convergence();
        let workload = Workload::new(self.account, amount, workers, balance, self.delay.clone());
        workload.validate()?;
        self.store.ensure_account(self.account).await?;

        let mut results = vec![self.trial(0, &Sequential, &workload).await];

        for index in 1..=trials {
            let result = self.trial(index, execution, &workload).await;
            let stop = self.stop.should_stop(&result, converges);
            results.push(result);
            if stop {
                tracing::info!(trial = index, stop = %self.stop, "stopping early");
                break;
            }
        }

        Ok(results)
    }

    /// Empty the ledger, zero the balance and drop trace and callbacks.
    pub async fn reset(&self) -> Result<()> {
        let account = self.account;
        self.store.ensure_account(account).await?;
        self.store.delete_all_entries(account).await?;
        self.store.set_balance(account, 0, &WorkerContext::new(0)).await?;
        self.store.clear_trace(account).await?;
        self.store.clear_callbacks(account)?;
        Ok(())
    }

    async fn observe(&self) -> Result<Observed> {
        let account = self.store.account(self.account).await?;
        Ok(Observed {
            final_balance: account.balance,
            entries_count: account.entries_count,
            entries_sum: self.store.sum_entries(self.account).await?,
            trace: self.store.trace(self.account).await?,
        })
    }

    /// Store errors while resetting or reading back mark the trial FAILED.
    async fn trial(&self, index: usize, execution: &dyn ExecutionStrategy, workload: &Workload) -> TrialResult {
        let (mut failures, elapsed) = match self.reset().await {
            Ok(()) => {
                let started = Instant::now();
                let outcome = execution.run(&self.store, workload).await;
                let elapsed = started.elapsed();

                let failures = match outcome {
                    Ok(_) => Vec::new(),
                    Err(LedgerError::TrialFailed(failures)) => failures,
                    Err(err) => vec![WorkerFailure::from_error(err)],
                };
                (failures, elapsed)
            }
            Err(err) => {
                tracing::warn!(trial = index, error = %err, "reset failed");
                (vec![WorkerFailure::from_error(err)], Duration::ZERO)
            }
        };

        let observed = match self.observe().await {
            Ok(observed) => observed,
            Err(err) => {
                tracing::warn!(trial = index, error = %err, "failed to read trial results");
                failures.push(WorkerFailure::from_error(err));
                Observed::default()
            }
        };

        let expected = workload.expected();
        let classification = Classification::classify(expected, observed.final_balance, &failures);

        tracing::info!(
            trial = index,
            execution = %execution.kind(),
            balance = %workload.balance.kind(),
            expected,
            final_balance = observed.final_balance,
            %classification,
            "trial finished"
        );

        TrialResult {
            index,
            execution: execution.kind(),
            balance: workload.balance.kind(),
            workers: workload.workers,
            amount: workload.amount,
            expected,
            final_balance: observed.final_balance,
            entries_count: observed.entries_count,
            entries_sum: observed.entries_sum,
            trace: observed.trace,
            classification,
            failures,
            elapsed,
        }
    }
}

/// Account state read back after a trial.
#[derive(Debug, Default)]
struct Observed {
    final_balance: i64,
    entries_count: u64,
    entries_sum: i64,
    trace: Vec<TraceEvent>,
}
