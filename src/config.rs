//! Store Configuration
//!
//! Capacity policy for a single store and settings for the store manager.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};

/// Host-facing encoding of "no limit" for entry counts and TTLs.
pub const UNBOUNDED: i64 = -1;

/// Default period between eviction passes.
pub const DEFAULT_EXPIRATION_INTERVAL: Duration = Duration::from_secs(5);

/// Capacity and durability policy for one named store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    /// Survive process restarts
    pub persistent: bool,

    /// Soft upper bound on entry count (None = unbounded)
    pub max_entries: Option<usize>,

    /// Maximum entry age (None = never expire)
    pub entry_ttl: Option<Duration>,

    /// How often the eviction pass runs
    pub expiration_interval: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            persistent: false,
            max_entries: None,
            entry_ttl: None,
            expiration_interval: DEFAULT_EXPIRATION_INTERVAL,
        }
    }
}

impl StoreSettings {
    /// Unbounded transient store
    pub fn transient() -> Self {
        Self::default()
    }

    /// Unbounded persistent store
    pub fn persistent() -> Self {
        Self {
            persistent: true,
            ..Self::default()
        }
    }

    /// Build settings from the `-1`-means-unbounded millisecond encoding.
    pub fn from_raw(
        persistent: bool,
        max_entries: i64,
        entry_ttl_ms: i64,
        expiration_interval_ms: i64,
    ) -> StoreResult<Self> {
        let max_entries = match max_entries {
            UNBOUNDED => None,
            n if n < 0 => {
                return Err(StoreError::Configuration(format!(
                    "max entries must be {} or non-negative, got {}",
                    UNBOUNDED, n
                )))
            }
            n => Some(n as usize),
        };
        let entry_ttl = match entry_ttl_ms {
            UNBOUNDED => None,
            n if n < 0 => {
                return Err(StoreError::Configuration(format!(
                    "entry TTL must be {} or non-negative, got {}",
                    UNBOUNDED, n
                )))
            }
            n => Some(Duration::from_millis(n as u64)),
        };
        if expiration_interval_ms <= 0 && (max_entries.is_some() || entry_ttl.is_some()) {
            return Err(StoreError::Configuration(format!(
                "expiration interval must be positive, got {}ms",
                expiration_interval_ms
            )));
        }
        let settings = Self {
            persistent,
            max_entries,
            entry_ttl,
            expiration_interval: Duration::from_millis(expiration_interval_ms.max(0) as u64),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn with_entry_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = Some(ttl);
        self
    }

    pub fn with_expiration_interval(mut self, interval: Duration) -> Self {
        self.expiration_interval = interval;
        self
    }

    /// True when either bound is set and an eviction task is needed.
    pub fn is_bounded(&self) -> bool {
        self.max_entries.is_some() || self.entry_ttl.is_some()
    }

    /// Reject settings an eviction task could not honor.
    pub fn validate(&self) -> StoreResult<()> {
        if !self.is_bounded() {
            return Ok(());
        }
        if self.expiration_interval.is_zero() {
            return Err(StoreError::Configuration(
                "expiration interval must be positive for a bounded store".to_string(),
            ));
        }
        if self.max_entries == Some(0) {
            return Err(StoreError::Configuration(
                "max entries of 0 would evict every entry; use a positive bound".to_string(),
            ));
        }
        Ok(())
    }
}

/// Store manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Root directory of the persistent backend
    pub persistent_root: PathBuf,

    /// Interval used when a caller does not pick one
    pub default_expiration_interval: Duration,

    /// Worker threads of the shared eviction scheduler
    pub scheduler_threads: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            persistent_root: PathBuf::from("./data/objectstore"),
            default_expiration_interval: DEFAULT_EXPIRATION_INTERVAL,
            scheduler_threads: 1,
        }
    }
}

impl ManagerConfig {
    pub fn with_persistent_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.persistent_root = root.into();
        self
    }

    pub fn with_default_expiration_interval(mut self, interval: Duration) -> Self {
        self.default_expiration_interval = interval;
        self
    }

    pub fn with_scheduler_threads(mut self, threads: usize) -> Self {
        self.scheduler_threads = threads;
        self
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.scheduler_threads == 0 {
            return Err(StoreError::Configuration(
                "scheduler needs at least one thread".to_string(),
            ));
        }
        if self.default_expiration_interval.is_zero() {
            return Err(StoreError::Configuration(
                "default expiration interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
