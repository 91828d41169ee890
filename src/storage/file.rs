//! File-backed ledger store shared between processes.
//!
//! The whole ledger lives in one MessagePack file. Every call takes the
//! store latch (a `create_new` marker file), loads the state, applies one
//! statement and writes it back through a temp file + rename. Account locks
//! are separate `create_new` lock files so that any process can see them.

use super::config::{StoreBackend, StoreConfig};
use super::engine::{AccountLock, CreateCallback, CreateNotice, LedgerStore, TouchCallback, TouchNotice};
use super::notify::NotificationHub;
use super::state::LedgerState;
use crate::core::{
    Account, AccountId, Entry, LedgerError, Result, TraceEvent, TraceKind, WorkerContext,
};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::io::AsyncWriteExt;

const STATE_FILE: &str = "ledger.msgpack";
const LATCH_FILE: &str = "ledger.latch";
const LATCH_POLL: Duration = Duration::from_millis(1);

pub struct FileLedgerStore {
    config: StoreConfig,
    root: PathBuf,
    hub: NotificationHub,
}

/// Marker file removed on drop.
struct MarkerFile {
    path: PathBuf,
}

impl MarkerFile {
    async fn try_create(path: &Path, contents: &str) -> std::io::Result<Option<Self>> {
        let created = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await;

        match created {
            Ok(mut file) => {
                let marker = Self {
                    path: path.to_path_buf(),
                };
                file.write_all(contents.as_bytes()).await?;
                Ok(Some(marker))
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl Drop for MarkerFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove marker file");
        }
    }
}

impl FileLedgerStore {
    /// Open (and initialise if needed) the store rooted at the configured directory
    pub async fn open(config: StoreConfig) -> Result<Self> {
        config.validate().map_err(LedgerError::InvalidConfiguration)?;

        let root = match &config.backend {
            StoreBackend::File { root } => root.clone(),
            StoreBackend::Memory => {
                return Err(LedgerError::InvalidConfiguration(
                    "file store opened with a memory backend".into(),
                ));
            }
        };

        fs::create_dir_all(&root).await.map_err(|err| {
            LedgerError::StoreUnavailable(format!(
                "Failed to create store directory '{}': {}",
                root.display(),
                err
            ))
        })?;

        let hub = NotificationHub::new(config.touch_mode);
        let store = Self { config, root, hub };

        let _latch = store.latch().await?;
        if fs::metadata(store.state_path()).await.is_err() {
            store.write_state(&LedgerState::new()).await?;
        }

        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_path(&self) -> PathBuf {
        self.root.join(STATE_FILE)
    }

    fn lock_path(&self, account: AccountId) -> PathBuf {
        self.root.join(format!("account-{}.lock", account))
    }

    async fn latch(&self) -> Result<MarkerFile> {
        let path = self.root.join(LATCH_FILE);
        let start = Instant::now();
        let holder = std::process::id().to_string();

        loop {
            match MarkerFile::try_create(&path, &holder).await {
                Ok(Some(latch)) => return Ok(latch),
                Ok(None) => {}
                Err(err) => {
                    return Err(LedgerError::StoreUnavailable(format!(
                        "Failed to take store latch '{}': {}",
                        path.display(),
                        err
                    )));
                }
            }

            if start.elapsed() > self.config.latch_timeout {
                return Err(LedgerError::StoreUnavailable(format!(
                    "Store latch '{}' not released within {:?}",
                    path.display(),
                    self.config.latch_timeout
                )));
            }

            tokio::time::sleep(LATCH_POLL).await;
        }
    }

    async fn read_state(&self) -> Result<LedgerState> {
        let path = self.state_path();
        let bytes = fs::read(&path).await.map_err(|err| {
            LedgerError::StoreUnavailable(format!(
                "Failed to read ledger '{}': {}",
                path.display(),
                err
            ))
        })?;

        rmp_serde::from_slice(&bytes).map_err(|err| {
            LedgerError::Serialization(format!("Failed to decode ledger: {}", err))
        })
    }

    async fn write_state(&self, state: &LedgerState) -> Result<()> {
        let path = self.state_path();
        let bytes = rmp_serde::to_vec(state).map_err(|err| {
            LedgerError::Serialization(format!("Failed to encode ledger: {}", err))
        })?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &bytes).await.map_err(|err| {
            LedgerError::StoreUnavailable(format!(
                "Failed to write temp file '{}': {}",
                tmp.display(),
                err
            ))
        })?;

        fs::rename(&tmp, &path).await.map_err(|err| {
            LedgerError::StoreUnavailable(format!(
                "Failed to rename temp file '{}' -> '{}': {}",
                tmp.display(),
                path.display(),
                err
            ))
        })?;
        Ok(())
    }

    /// Read-only statement under the latch.
    async fn query<T>(&self, f: impl FnOnce(&LedgerState) -> Result<T>) -> Result<T> {
        let _latch = self.latch().await?;
        let state = self.read_state().await?;
        f(&state)
    }

    /// Mutating statement under the latch; nothing is written if `f` fails.
    async fn mutate<T>(&self, f: impl FnOnce(&mut LedgerState) -> Result<T>) -> Result<T> {
        let _latch = self.latch().await?;
        let mut state = self.read_state().await?;
        let value = f(&mut state)?;
        self.write_state(&state).await?;
        Ok(value)
    }
}

#[async_trait]
impl LedgerStore for FileLedgerStore {
    fn name(&self) -> &'static str {
        "file"
    }

    fn config(&self) -> &StoreConfig {
        &self.config
    }

    async fn ensure_account(&self, account: AccountId) -> Result<Account> {
        self.mutate(|state| Ok(state.ensure_account(account))).await
    }

    async fn account(&self, account: AccountId) -> Result<Account> {
        self.query(|state| state.account(account)).await
    }

    async fn create_entry(&self, account: AccountId, amount: i64, ctx: &WorkerContext) -> Result<Entry> {
        let entry = self.mutate(|state| state.create_entry(account, amount)).await?;
        tracing::debug!(worker = ctx.index(), account = %account, entry = %entry.id, "entry committed");

        self.hub
            .fire_create(CreateNotice {
                entry: entry.clone(),
                worker: *ctx,
            })
            .await?;
        Ok(entry)
    }

    async fn entries(&self, account: AccountId) -> Result<Vec<Entry>> {
        self.query(|state| state.entries(account)).await
    }

    async fn delete_all_entries(&self, account: AccountId) -> Result<()> {
        let removed = self.mutate(|state| state.delete_all_entries(account)).await?;
        tracing::debug!(account = %account, removed, "ledger cleared");
        Ok(())
    }

    async fn set_balance(&self, account: AccountId, value: i64, ctx: &WorkerContext) -> Result<()> {
        self.mutate(|state| state.set_balance(account, value)).await?;
        tracing::debug!(worker = ctx.index(), account = %account, value, "balance written");
        Ok(())
    }

    async fn get_balance(&self, account: AccountId) -> Result<i64> {
        self.query(|state| Ok(state.account(account)?.balance)).await
    }

    async fn sum_entries(&self, account: AccountId) -> Result<i64> {
        self.query(|state| state.sum_entries(account)).await
    }

    async fn acquire_exclusive_lock(&self, account: AccountId, ctx: &WorkerContext) -> Result<AccountLock> {
        let path = self.lock_path(account);
        let holder = format!("pid={} worker={}", std::process::id(), ctx.index());

        for attempt in 1..=self.config.lock_attempts {
            let created = MarkerFile::try_create(&path, &holder).await.map_err(|err| {
                LedgerError::StoreUnavailable(format!(
                    "Failed to create lock file '{}': {}",
                    path.display(),
                    err
                ))
            })?;

            if let Some(marker) = created {
                tracing::debug!(worker = ctx.index(), account = %account, attempt, "account lock taken");
                return Ok(AccountLock::new(account, ctx, Box::new(marker)));
            }
            if attempt < self.config.lock_attempts {
                tokio::time::sleep(self.config.lock_backoff).await;
            }
        }

        Err(LedgerError::LockTimeout {
            account,
            attempts: self.config.lock_attempts,
        })
    }

    async fn atomic_increment_balance(&self, account: AccountId, delta: i64, ctx: &WorkerContext) -> Result<i64> {
        let balance = self
            .mutate(|state| state.increment_balance(account, delta))
            .await?;
        tracing::debug!(worker = ctx.index(), account = %account, delta, balance, "balance incremented");
        Ok(balance)
    }

    fn register_on_create(&self, account: AccountId, callback: CreateCallback) -> Result<()> {
        self.hub.register_on_create(account, callback)
    }

    fn register_on_touch(&self, account: AccountId, callback: TouchCallback) -> Result<()> {
        self.hub.register_on_touch(account, callback)
    }

    fn clear_callbacks(&self, account: AccountId) -> Result<()> {
        self.hub.clear(account)
    }

    async fn touch(&self, account: AccountId, ctx: &WorkerContext) -> Result<()> {
        self.mutate(|state| state.touch(account)).await?;
        self.hub
            .fire_touch(TouchNotice {
                account,
                worker: *ctx,
            })
            .await
    }

    async fn settle_touches(&self) -> Result<()> {
        self.hub.settle().await
    }

    async fn record_event(&self, account: AccountId, ctx: &WorkerContext, kind: TraceKind) -> Result<TraceEvent> {
        self.mutate(|state| state.record_event(account, ctx, kind)).await
    }

    async fn trace(&self, account: AccountId) -> Result<Vec<TraceEvent>> {
        self.query(|state| Ok(state.trace(account))).await
    }

    async fn clear_trace(&self, account: AccountId) -> Result<()> {
        self.mutate(|state| {
            state.clear_trace(account);
            Ok(())
        })
        .await
    }
}
