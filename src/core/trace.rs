use super::types::{AccountId, EntryId, WorkerContext};
use super::Result;
use crate::storage::LedgerStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What a worker did at one step of a trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceKind {
    EntryCreated { entry: EntryId },
    BalanceCalculated { balance: i64 },
    BalanceSaved { balance: i64 },
    BalanceIncremented { delta: i64, balance: i64 },
    LockAcquired,
    LockReleased,
}

/// A journaled step, ordered by the store-assigned `seq`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub seq: u64,
    pub worker: usize,
    pub account: AccountId,
    pub kind: TraceKind,
    pub at: DateTime<Utc>,
}

impl fmt::Display for TraceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] ", self.worker)?;
        match &self.kind {
            TraceKind::EntryCreated { entry } => write!(f, "Record created: {}", entry),
            TraceKind::BalanceCalculated { balance } => write!(f, "Balance calculated: {}", balance),
            TraceKind::BalanceSaved { balance } => write!(f, "Balance saved: {}", balance),
            TraceKind::BalanceIncremented { delta, .. } => write!(f, "Balance saved: + {}", delta),
            TraceKind::LockAcquired => write!(f, "Lock acquired"),
            TraceKind::LockReleased => write!(f, "Lock released"),
        }
    }
}

/// Journal a step in the store and log it under the worker's identity.
pub async fn emit(
    store: &dyn LedgerStore,
    ctx: &WorkerContext,
    account: AccountId,
    kind: TraceKind,
) -> Result<TraceEvent> {
    let event = store.record_event(account, ctx, kind).await?;
    tracing::info!(worker = ctx.index(), account = %account, seq = event.seq, "{}", event);
    Ok(event)
}
