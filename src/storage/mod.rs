pub mod config;
pub mod engine;
pub mod file;
pub mod memory;
pub mod notify;
pub mod state;

pub use config::{StoreBackend, StoreConfig, TouchMode};
pub use engine::{
    AccountLock, CreateCallback, CreateNotice, LedgerStore, TouchCallback, TouchNotice,
    with_exclusive_lock,
};
pub use file::FileLedgerStore;
pub use memory::MemoryLedgerStore;

use crate::core::{LedgerError, Result};
use std::sync::Arc;

/// Open a store connection for the configured backend.
pub async fn open_store(config: StoreConfig) -> Result<Arc<dyn LedgerStore>> {
    config.validate().map_err(LedgerError::InvalidConfiguration)?;

    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryLedgerStore::new(config))),
        StoreBackend::File { .. } => Ok(Arc::new(FileLedgerStore::open(config).await?)),
    }
}
