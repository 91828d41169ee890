//! Execution strategies: how W workers are launched against one store.

pub mod isolated;
pub mod sequential;
pub mod shared;
pub mod worker;

pub use isolated::{ChildReport, ChildSpec, IsolatedMemoryParallel};
pub use sequential::Sequential;
pub use shared::SharedMemoryParallel;

use crate::balance::BalanceUpdateStrategy;
use crate::core::{AccountId, LedgerError, Result, WorkerFailure};
use crate::delay::Delay;
use crate::storage::LedgerStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionKind {
    /// One worker after another in the calling task
    Sequential,
    /// Tasks on the multi-threaded runtime sharing one store handle
    #[value(alias = "threads")]
    SharedMemory,
    /// Child processes, each with its own store connection
    #[value(alias = "processes")]
    IsolatedMemory,
}

impl ExecutionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::SharedMemory => "shared-memory",
            Self::IsolatedMemory => "isolated-memory",
        }
    }
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What every worker of a trial does.
#[derive(Clone)]
pub struct Workload {
    pub account: AccountId,
    pub amount: i64,
    pub workers: usize,
    pub balance: Arc<dyn BalanceUpdateStrategy>,
    pub delay: Arc<dyn Delay>,
}

impl Workload {
    pub fn new(
        account: AccountId,
        amount: i64,
        workers: usize,
        balance: Arc<dyn BalanceUpdateStrategy>,
        delay: Arc<dyn Delay>,
    ) -> Self {
        Self {
            account,
            amount,
            workers,
            balance,
            delay,
        }
    }

    /// Balance every worker's entry adds up to.
    /// `workers * amount`, saturating for workloads `validate` rejects.
    pub fn expected(&self) -> i64 {
        self.checked_expected().unwrap_or(if self.amount < 0 { i64::MIN } else { i64::MAX })
    }

    fn checked_expected(&self) -> Option<i64> {
        i64::try_from(self.workers)
            .ok()
            .and_then(|workers| self.amount.checked_mul(workers))
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(LedgerError::InvalidConfiguration(
                "at least one worker is required".to_string(),
            ));
        }
        if self.checked_expected().is_none() {
            return Err(LedgerError::InvalidConfiguration(format!(
                "{} workers of {} overflow the balance",
                self.workers, self.amount
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for Workload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Workload")
            .field("account", &self.account)
            .field("amount", &self.amount)
            .field("workers", &self.workers)
            .field("balance", &self.balance.kind())
            .field("delay", &self.delay.policy())
            .finish()
    }
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn kind(&self) -> ExecutionKind;

    /// Run every worker to completion and return the final balance.
    ///
    /// Workers that fail are collected into [`LedgerError::TrialFailed`]
    /// once all of them have been joined.
    async fn run(&self, store: &Arc<dyn LedgerStore>, workload: &Workload) -> Result<i64>;
}

/// Build an execution strategy; `worker_binary` is the program spawned for
/// isolated workers.
pub fn build(kind: ExecutionKind, worker_binary: Option<PathBuf>) -> Result<Arc<dyn ExecutionStrategy>> {
    Ok(match kind {
        ExecutionKind::Sequential => Arc::new(Sequential),
        ExecutionKind::SharedMemory => Arc::new(SharedMemoryParallel),
        ExecutionKind::IsolatedMemory => match worker_binary {
            Some(program) => Arc::new(IsolatedMemoryParallel::new(program)),
            None => Arc::new(IsolatedMemoryParallel::current_exe()?),
        },
    })
}

/// Settle pending touch cascades, then turn collected failures into the
/// trial outcome.
pub(crate) async fn finish(
    store: &dyn LedgerStore,
    workload: &Workload,
    mut failures: Vec<WorkerFailure>,
) -> Result<i64> {
    if let Err(err) = store.settle_touches().await {
        failures.push(WorkerFailure::from_error(err));
    }

    if !failures.is_empty() {
        return Err(LedgerError::TrialFailed(failures));
    }
    store.get_balance(workload.account).await
}
