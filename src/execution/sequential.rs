use super::{ExecutionKind, ExecutionStrategy, Workload, finish, worker};
use crate::core::{Result, WorkerContext, WorkerFailure};
use crate::storage::LedgerStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Runs workers strictly one after another; the correctness baseline.
///
/// Touch cascades dispatched in `TouchMode::Async` are settled before the
/// next worker starts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sequential;

#[async_trait]
impl ExecutionStrategy for Sequential {
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::Sequential
    }

    async fn run(&self, store: &Arc<dyn LedgerStore>, workload: &Workload) -> Result<i64> {
        workload.validate()?;
        worker::prepare_connection(store, workload).await?;

        let mut failures = Vec::new();
        for index in 0..workload.workers {
            let ctx = WorkerContext::new(index);
            if let Err(err) = worker::run(&ctx, store.as_ref(), workload).await {
                failures.push(WorkerFailure::new(index, err));
            }
            // A spawned cascade still belongs to this worker.
            if let Err(err) = store.settle_touches().await {
                failures.push(WorkerFailure::new(index, err));
            }
        }

        finish(store.as_ref(), workload, failures).await
    }
}
