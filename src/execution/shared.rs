use super::{ExecutionKind, ExecutionStrategy, Workload, finish, worker};
use crate::core::{LedgerError, Result, WorkerContext, WorkerFailure};
use crate::storage::LedgerStore;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Barrier;

/// Runs every worker as a task on the multi-threaded runtime, all sharing
/// one store handle.
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedMemoryParallel;

#[async_trait]
impl ExecutionStrategy for SharedMemoryParallel {
    fn kind(&self) -> ExecutionKind {
        ExecutionKind::SharedMemory
    }

    async fn run(&self, store: &Arc<dyn LedgerStore>, workload: &Workload) -> Result<i64> {
        workload.validate()?;
        worker::prepare_connection(store, workload).await?;

        let start = Arc::new(Barrier::new(workload.workers));
        let handles: Vec<_> = (0..workload.workers)
            .map(|index| {
                let store = store.clone();
                let workload = workload.clone();
                let start = start.clone();
                tokio::spawn(async move {
                    let ctx = WorkerContext::new(index);
                    start.wait().await;
                    worker::run(&ctx, store.as_ref(), &workload).await
                })
            })
            .collect();

        let mut failures = Vec::new();
        for (index, joined) in join_all(handles).await.into_iter().enumerate() {
            match joined {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => failures.push(WorkerFailure::new(index, err)),
                Err(join) => failures.push(WorkerFailure::new(
                    index,
                    LedgerError::WorkerFailed {
                        worker: index,
                        reason: format!("task panicked: {}", join),
                    },
                )),
            }
        }

        finish(store.as_ref(), workload, failures).await
    }
}
