use crate::{Result, StorageError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_POOL_CAPACITY: usize = 50;
pub const DEFAULT_DEADLOCK_TIMEOUT_MS: u64 = 1_000;
pub const DEFAULT_LOCK_WAIT_SLICE_MS: u64 = 100;

/// Tunables for the buffer pool. The page size is fixed at compile time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Maximum number of pages cached at once.
    pub pool_capacity: usize,
    /// How long a lock request may wait before its transaction is aborted.
    pub deadlock_timeout_ms: u64,
    /// Upper bound on a single condition-variable wait.
    pub lock_wait_slice_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            pool_capacity: DEFAULT_POOL_CAPACITY,
            deadlock_timeout_ms: DEFAULT_DEADLOCK_TIMEOUT_MS,
            lock_wait_slice_ms: DEFAULT_LOCK_WAIT_SLICE_MS,
        }
    }
}

impl StorageConfig {
    /// Defaults, overlaid by `path` (toml, json or yaml by extension) when
    /// given, overlaid by `HEAPDB_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path));
        }

        let settings = builder
            .add_source(::config::Environment::with_prefix("HEAPDB").try_parsing(true))
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects settings the pool cannot run with: an empty cache, or a zero
    /// wait slice, which would turn every lock wait into a spin.
    pub fn validate(&self) -> Result<()> {
        if self.pool_capacity == 0 {
            return Err(StorageError::InvalidConfig(
                "pool_capacity must be positive".to_string(),
            ));
        }
        if self.lock_wait_slice_ms == 0 {
            return Err(StorageError::InvalidConfig(
                "lock_wait_slice_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn deadlock_timeout(&self) -> Duration {
        Duration::from_millis(self.deadlock_timeout_ms)
    }

    pub fn lock_wait_slice(&self) -> Duration {
        Duration::from_millis(self.lock_wait_slice_ms)
    }
}
