use super::types::{AccountId, EntryId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerError {
    #[error("Account {0} not found")]
    AccountNotFound(AccountId),

    #[error("Lock timeout on account {account} after {attempts} attempts")]
    LockTimeout { account: AccountId, attempts: u32 },

    #[error("Balance of account {account} overflows i64")]
    BalanceOverflow { account: AccountId },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Partial operation: worker {worker} persisted entry {entry} but its balance update failed: {source}")]
    PartialOperation {
        worker: usize,
        entry: EntryId,
        source: Box<LedgerError>,
    },

    #[error("Touch cascade started by worker {worker} failed: {source}")]
    CascadeFailed {
        worker: usize,
        source: Box<LedgerError>,
    },

    #[error("Worker {worker} failed: {reason}")]
    WorkerFailed { worker: usize, reason: String },

    #[error("{} worker(s) failed: {}", .0.len(), format_failures(.0))]
    TrialFailed(Vec<WorkerFailure>),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

impl LedgerError {
    /// Worker the error is attributed to, when it carries one.
    pub fn worker(&self) -> Option<usize> {
        match self {
            Self::PartialOperation { worker, .. }
            | Self::CascadeFailed { worker, .. }
            | Self::WorkerFailed { worker, .. } => Some(*worker),
            _ => None,
        }
    }

    /// True when an entry was persisted without its balance update.
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::PartialOperation { .. } | Self::CascadeFailed { .. })
    }
}

/// One failed worker inside a trial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerFailure {
    pub worker: Option<usize>,
    pub error: LedgerError,
}

impl WorkerFailure {
    pub fn new(worker: usize, error: LedgerError) -> Self {
        Self {
            worker: Some(worker),
            error,
        }
    }

    /// Failure not tied to a single worker (e.g. settling touch cascades).
    pub fn from_error(error: LedgerError) -> Self {
        Self {
            worker: error.worker(),
            error,
        }
    }
}

impl std::fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.worker {
            Some(worker) => write!(f, "[{}] {}", worker, self.error),
            None => write!(f, "[-] {}", self.error),
        }
    }
}

fn format_failures(failures: &[WorkerFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl<T> From<std::sync::PoisonError<T>> for LedgerError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreUnavailable(err.to_string())
    }
}
