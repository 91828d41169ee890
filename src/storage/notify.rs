//! Callback registry behind `register_on_create` / `register_on_touch`.

use super::config::TouchMode;
use super::engine::{CreateCallback, CreateNotice, TouchCallback, TouchNotice};
use crate::core::{AccountId, LedgerError, Result};
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

pub struct NotificationHub {
    mode: TouchMode,
    on_create: RwLock<HashMap<AccountId, Vec<CreateCallback>>>,
    on_touch: RwLock<HashMap<AccountId, Vec<TouchCallback>>>,
    pending: Mutex<Vec<(usize, JoinHandle<Result<()>>)>>,
}

impl NotificationHub {
    pub fn new(mode: TouchMode) -> Self {
        Self {
            mode,
            on_create: RwLock::new(HashMap::new()),
            on_touch: RwLock::new(HashMap::new()),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn register_on_create(&self, account: AccountId, callback: CreateCallback) -> Result<()> {
        self.on_create.write()?.entry(account).or_default().push(callback);
        Ok(())
    }

    pub fn register_on_touch(&self, account: AccountId, callback: TouchCallback) -> Result<()> {
        self.on_touch.write()?.entry(account).or_default().push(callback);
        Ok(())
    }

    pub fn clear(&self, account: AccountId) -> Result<()> {
        self.on_create.write()?.remove(&account);
        self.on_touch.write()?.remove(&account);
        Ok(())
    }

    /// Run `on_create` callbacks inline, in registration order.
    pub async fn fire_create(&self, notice: CreateNotice) -> Result<()> {
        let callbacks = self
            .on_create
            .read()?
            .get(&notice.entry.account_id)
            .cloned()
            .unwrap_or_default();

        for callback in callbacks {
            callback(notice.clone()).await?;
        }
        Ok(())
    }

    pub async fn fire_touch(&self, notice: TouchNotice) -> Result<()> {
        let callbacks = self
            .on_touch
            .read()?
            .get(&notice.account)
            .cloned()
            .unwrap_or_default();

        match self.mode {
            TouchMode::Sync => {
                for callback in callbacks {
                    callback(notice.clone()).await?;
                }
            }
            TouchMode::Async => {
                let mut pending = self.pending.lock()?;
                for callback in callbacks {
                    let worker = notice.worker.index();
                    pending.push((worker, tokio::spawn(callback(notice.clone()))));
                }
            }
        }
        Ok(())
    }

    /// Await every spawned touch callback; all are awaited even when one fails.
    pub async fn settle(&self) -> Result<()> {
        let pending = std::mem::take(&mut *self.pending.lock()?);
        let mut first_error = None;

        for (worker, handle) in pending {
            let error = match handle.await {
                Ok(Ok(())) => continue,
                Ok(Err(err)) => err,
                Err(join) => LedgerError::WorkerFailed {
                    worker,
                    reason: format!("touch callback panicked: {}", join),
                },
            };

            tracing::warn!(worker, error = %error, "touch cascade failed");
            first_error.get_or_insert(LedgerError::CascadeFailed {
                worker,
                source: Box::new(error),
            });
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
