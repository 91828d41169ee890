use super::Workload;
use crate::balance::BalanceUpdate;
use crate::core::trace::{self, TraceKind};
use crate::core::{LedgerError, Result, WorkerContext};
use crate::storage::{CreateCallback, CreateNotice, LedgerStore};
use futures::FutureExt;
use std::sync::Arc;

/// Register the harness callbacks on one store connection.
///
/// Replaces anything registered for the account earlier, journals
/// `EntryCreated` from `on_create`, then runs the strategy's own hook.
pub async fn prepare_connection(store: &Arc<dyn LedgerStore>, workload: &Workload) -> Result<()> {
    let account = workload.account;
    store.clear_callbacks(account)?;

    let weak = Arc::downgrade(store);
    let journal: CreateCallback = Arc::new(move |notice: CreateNotice| {
        let weak = weak.clone();
        async move {
            let store = weak.upgrade().ok_or_else(|| {
                LedgerError::StoreUnavailable("store connection closed".to_string())
            })?;
            let kind = TraceKind::EntryCreated {
                entry: notice.entry.id,
            };
            trace::emit(store.as_ref(), &notice.worker, notice.entry.account_id, kind).await?;
            Ok(())
        }
        .boxed()
    });
    store.register_on_create(account, journal)?;

    workload
        .balance
        .prepare(store, account, workload.delay.clone())
        .await
}

/// One worker's operation: create its entry and update the balance.
pub async fn run(ctx: &WorkerContext, store: &dyn LedgerStore, workload: &Workload) -> Result<BalanceUpdate> {
    tracing::debug!(worker = ctx.index(), account = %workload.account, strategy = %workload.balance.kind(), "worker started");

    let outcome = workload
        .balance
        .run_worker(ctx, store, workload.account, workload.amount, workload.delay.as_ref())
        .await;

    match &outcome {
        Ok(update) => tracing::debug!(worker = ctx.index(), ?update, "worker finished"),
        Err(err) => tracing::warn!(worker = ctx.index(), error = %err, "worker failed"),
    }
    outcome
}
