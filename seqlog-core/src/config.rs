//! Configuration.
//!
//! Every section has defaults, so an empty YAML document is a valid
//! configuration:
//!
//! ```yaml
//! log:
//!   readonly: false
//!   closable: false
//!   preallocate: 3145728
//! runtime:
//!   maintenance: true
//!   maintenance_interval_ms: 10
//! sequence:
//!   announce_subscriptions: true
//! ```

use crate::error::{Result, SeqlogError};
use crate::log::PREALLOC_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Options for opening a log file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Open the file without write access. Mutating calls fail.
    pub readonly: bool,
    /// Allow sub-streams to be closed. Must match the mode stored in the file.
    pub closable: bool,
    /// Bytes mapped ahead of the write frontier by the maintenance task.
    pub preallocate: u64,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            readonly: false,
            closable: false,
            preallocate: PREALLOC_SIZE,
        }
    }
}

impl LogConfig {
    /// Open read-only.
    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    /// Set the closable mode.
    pub fn with_closable(mut self, closable: bool) -> Self {
        self.closable = closable;
        self
    }

    /// Set how far ahead the maintenance task maps pages.
    pub fn with_preallocate(mut self, bytes: u64) -> Self {
        self.preallocate = bytes;
        self
    }
}

/// Options for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Run the background maintenance thread.
    ///
    /// When disabled, pages are mapped inline by the reserving thread and
    /// nothing is flushed until [`MappedLog::flush`](crate::MappedLog::flush).
    pub maintenance: bool,
    /// Interval between maintenance passes.
    pub maintenance_interval_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            maintenance: true,
            maintenance_interval_ms: 10,
        }
    }
}

impl RuntimeConfig {
    /// Configuration without a background thread, for deterministic runs.
    pub fn deterministic() -> Self {
        Self {
            maintenance: false,
            ..Self::default()
        }
    }

    /// Enable or disable the maintenance thread.
    pub fn with_maintenance(mut self, enabled: bool) -> Self {
        self.maintenance = enabled;
        self
    }

    /// Set the maintenance interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Maintenance interval as a `Duration`.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms.max(1))
    }
}

/// Options for a [`Sequence`](crate::Sequence).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Mark streams as subscribed in the log when data callbacks attach to
    /// them on a writable log.
    pub announce_subscriptions: bool,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            announce_subscriptions: true,
        }
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log file options.
    pub log: LogConfig,
    /// Runtime options.
    pub runtime: RuntimeConfig,
    /// Sequence options.
    pub sequence: SequenceConfig,
}

impl Config {
    /// Parse a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(|e| SeqlogError::ConfigParse {
            origin: "<inline>".to_string(),
            cause: e.to_string(),
        })
    }

    /// Load a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SeqlogError::ConfigRead {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        serde_yaml::from_str(&content).map_err(|e| SeqlogError::ConfigParse {
            origin: path.display().to_string(),
            cause: e.to_string(),
        })
    }
}
