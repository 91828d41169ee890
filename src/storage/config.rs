use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Where the ledger lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreBackend {
    /// Process-local store; only reachable by in-process workers.
    Memory,
    /// Directory shared by every process that opens it.
    File { root: PathBuf },
}

/// How `touch` dispatches registered callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TouchMode {
    /// Callbacks run inline before `touch` returns.
    #[default]
    Sync,
    /// Callbacks run on spawned tasks; `settle_touches` awaits them.
    Async,
}

/// Store connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Storage backend
    pub backend: StoreBackend,

    /// Attempts made to take an account lock before giving up
    pub lock_attempts: u32,

    /// Pause between two lock attempts
    pub lock_backoff: Duration,

    /// How long a file store operation waits for the store latch
    pub latch_timeout: Duration,

    /// Touch callback dispatch
    pub touch_mode: TouchMode,
}

impl StoreConfig {
    /// In-memory store configuration
    pub fn memory() -> Self {
        Self {
            backend: StoreBackend::Memory,
            lock_attempts: 1000,
            lock_backoff: Duration::from_millis(10),
            latch_timeout: Duration::from_secs(10),
            touch_mode: TouchMode::Sync,
        }
    }

    /// File store rooted at `root`
    pub fn file(root: impl AsRef<Path>) -> Self {
        Self {
            backend: StoreBackend::File {
                root: root.as_ref().to_path_buf(),
            },
            ..Self::memory()
        }
    }

    /// Set lock attempts
    pub fn lock_attempts(mut self, attempts: u32) -> Self {
        self.lock_attempts = attempts;
        self
    }

    /// Set lock backoff
    pub fn lock_backoff(mut self, backoff: Duration) -> Self {
        self.lock_backoff = backoff;
        self
    }

    /// Set latch timeout
    pub fn latch_timeout(mut self, timeout: Duration) -> Self {
        self.latch_timeout = timeout;
        self
    }

    /// Set touch dispatch mode
    pub fn touch_mode(mut self, mode: TouchMode) -> Self {
        self.touch_mode = mode;
        self
    }

    pub fn is_shared_across_processes(&self) -> bool {
        matches!(self.backend, StoreBackend::File { .. })
    }

    /// Parse from a store URL
    ///
    /// Accepted forms: `memory://` and `file:///absolute/path`.
    pub fn from_url(url: &str) -> Result<Self, String> {
        if url == "memory://" || url == "memory" {
            return Ok(Self::memory());
        }

        let Some(path) = url.strip_prefix("file://") else {
            return Err(format!("Unsupported store URL '{}'", url));
        };

        if path.is_empty() {
            return Err("File store URL needs a path".to_string());
        }

        Ok(Self::file(path))
    }

    /// Convert to a store URL
    pub fn to_url(&self) -> String {
        match &self.backend {
            StoreBackend::Memory => "memory://".to_string(),
            StoreBackend::File { root } => format!("file://{}", root.display()),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.lock_attempts == 0 {
            return Err("lock_attempts must be > 0".to_string());
        }

        if self.latch_timeout.is_zero() {
            return Err("latch_timeout must be > 0".to_string());
        }

        if let StoreBackend::File { root } = &self.backend {
            if root.as_os_str().is_empty() {
                return Err("file store root cannot be empty".to_string());
            }
        }

        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::memory()
    }
}
