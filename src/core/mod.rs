pub mod error;
pub mod trace;
pub mod types;

pub use error::{LedgerError, Result, WorkerFailure};
pub use trace::{TraceEvent, TraceKind};
pub use types::{Account, AccountId, Entry, EntryId, WorkerContext, checked_total};
