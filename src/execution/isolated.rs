use super::{ExecutionKind, ExecutionStrategy, Workload, finish, worker};
use crate::balance::{self, BalanceStrategyKind, BalanceUpdate};
use crate::core::{AccountId, LedgerError, Result, WorkerContext, WorkerFailure};
use crate::delay::DelayPolicy;
use crate::storage::{LedgerStore, StoreBackend, StoreConfig, open_store};
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::time::Instant;

const GATE_POLL: Duration = Duration::from_millis(1);
const STDERR_TAIL_LINES: usize = 5;

/// Everything a child process needs to run one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildSpec {
    pub store: StoreConfig,
    pub account: AccountId,
    pub amount: i64,
    pub workers: usize,
    pub index: usize,
    pub balance: BalanceStrategyKind,
    pub delay: DelayPolicy,
    /// File whose appearance releases all children together.
    pub start_gate: PathBuf,
    pub gate_timeout: Duration,
}

/// Outcome a child prints on stdout as one JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildReport {
    pub worker: usize,
    pub outcome: std::result::Result<BalanceUpdate, LedgerError>,
}

/// Runs every worker in its own OS process.
///
/// Children open their own connection to a file-backed store; nothing but
/// the store is shared with the parent.
#[derive(Debug, Clone)]
pub struct IsolatedMemoryParallel {
    program: PathBuf,
    gate_timeout: Duration,
}

impl IsolatedMemoryParallel {
    /// `program` must accept the hidden `worker --spec <json>` subcommand.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            gate_timeout: Duration::from_secs(30),
        }
    }

    /// Spawn the running executable as the worker program.
    pub fn current_exe() -> Result<Self> {
        let program = std::env::current_exe()
            .map_err(|err| LedgerError::InvalidConfiguration(format!("cannot locate worker binary: {}", err)))?;
        Ok(Self::new(program))
    }

    pub fn gate_timeout(mut self, timeout: Duration) -> Self {
        self.gate_timeout = timeout;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn spawn_child(&self, spec: &ChildSpec) -> Result<Child> {
        let json = serde_json::to_string(spec).map_err(|err| LedgerError::Serialization(err.to_string()))?;

        Command::new(&self.program)
            .arg("worker")
            .arg("--spec")
            .arg(json)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| LedgerError::WorkerFailed {
                worker: spec.index,
                reason: format!("spawn {}: {}", self.program.display(), err),
            })
    }
}

#[async_trait]
impl ExecutionStrategy for IsolatedMemoryParallel {
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::IsolatedMemory
    }

    async fn run(&self, store: &Arc<dyn LedgerStore>, workload: &Workload) -> Result<i64> {
        workload.validate()?;

        let config = store.config().clone();
        let root = match &config.backend {
            StoreBackend::File { root } => root.clone(),
            StoreBackend::Memory => {
                return Err(LedgerError::InvalidConfiguration(
                    "isolated-memory execution needs a store shared across processes (file backend)"
                        .to_string(),
                ));
            }
        };
        let delay = workload.delay.policy().ok_or_else(|| {
            LedgerError::InvalidConfiguration("delay cannot be handed to a child process".to_string())
        })?;

        let start_gate = root.join(format!("start-{}.gate", uuid::Uuid::new_v4()));
        let mut failures = Vec::new();
        let mut children = Vec::with_capacity(workload.workers);

        for index in 0..workload.workers {
            let spec = ChildSpec {
                store: config.clone(),
                account: workload.account,
                amount: workload.amount,
                workers: workload.workers,
                index,
                balance: workload.balance.kind(),
                delay: delay.clone(),
                start_gate: start_gate.clone(),
                gate_timeout: self.gate_timeout,
            };
            match self.spawn_child(&spec) {
                Ok(child) => children.push((index, child)),
                Err(err) => failures.push(WorkerFailure::new(index, err)),
            }
        }
        tracing::debug!(children = children.len(), gate = %start_gate.display(), "opening start gate");
        if let Err(err) = open_gate(&start_gate, &mut children).await {
            failures.push(WorkerFailure::from_error(err));
        }

        let outputs = join_all(
            children
                .into_iter()
                .map(|(index, child)| async move { (index, child.wait_with_output().await) }),
        )
        .await;

        if let Err(err) = tokio::fs::remove_file(&start_gate).await {
            tracing::debug!(error = %err, "start gate already gone");
        }

        for (index, output) in outputs {
            let outcome = match output {
                Ok(output) => child_outcome(index, &output),
                Err(err) => Err(LedgerError::WorkerFailed {
                    worker: index,
                    reason: format!("wait for child: {}", err),
                }),
            };
            if let Err(err) = outcome {
                failures.push(WorkerFailure::new(index, err));
            }
        }

        finish(store.as_ref(), workload, failures).await
    }
}

/// Release the children. If the gate cannot be written they would wait for
/// it until their timeout, so they are killed instead; callers still wait
/// on every child.
async fn open_gate(gate: &Path, children: &mut [(usize, Child)]) -> Result<()> {
    let Err(err) = tokio::fs::write(gate, b"go").await else {
        return Ok(());
    };
    tracing::warn!(gate = %gate.display(), error = %err, "failed to open start gate");
    for (index, child) in children.iter_mut() {
        if let Err(err) = child.start_kill() {
            tracing::debug!(worker = *index, error = %err, "child already exited");
        }
    }
    Err(err.into())
}

/// Relay a child's log output and recover its typed outcome.
fn child_outcome(index: usize, output: &Output) -> Result<BalanceUpdate> {
    let stderr = String::from_utf8_lossy(&output.stderr);
    for line in stderr.lines().filter(|line| !line.trim().is_empty()) {
        tracing::debug!(worker = index, "child: {}", line);
    }

    let report = String::from_utf8_lossy(&output.stdout)
        .lines()
        .rev()
        .find_map(|line| serde_json::from_str::<ChildReport>(line).ok());

    match report {
        Some(report) => report.outcome,
        None => {
            let tail: Vec<&str> = stderr.lines().rev().take(STDERR_TAIL_LINES).collect();
            let tail: Vec<&str> = tail.into_iter().rev().collect();
            Err(LedgerError::WorkerFailed {
                worker: index,
                reason: format!("exited with {} without a report: {}", output.status, tail.join(" | ")),
            })
        }
    }
}

async fn wait_for_gate(gate: &Path, timeout: Duration) -> Result<()> {
    let deadline = Instant::now() + timeout;
    while !tokio::fs::try_exists(gate).await? {
        if Instant::now() >= deadline {
            return Err(LedgerError::StoreUnavailable(format!(
                "start gate {} never opened",
                gate.display()
            )));
        }
        tokio::time::sleep(GATE_POLL).await;
    }
    Ok(())
}

async fn run_child_worker(spec: &ChildSpec) -> Result<BalanceUpdate> {
    let store = open_store(spec.store.clone()).await?;
    let workload = Workload::new(
        spec.account,
        spec.amount,
        spec.workers,
        balance::build(spec.balance),
        Arc::new(spec.delay.clone()),
    );
    worker::prepare_connection(&store, &workload).await?;

    wait_for_gate(&spec.start_gate, spec.gate_timeout).await?;

    let ctx = WorkerContext::new(spec.index);
    let update = worker::run(&ctx, store.as_ref(), &workload).await?;
    store.settle_touches().await?;
    Ok(update)
}

/// Child-process entry point behind the hidden `worker` subcommand.
pub async fn run_child(spec: ChildSpec) -> ChildReport {
    ChildReport {
        worker: spec.index,
        outcome: run_child_worker(&spec).await,
    }
}
