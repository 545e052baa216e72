//! Runtime context.
//!
//! A [`Runtime`] brackets the lifetime of the logs opened through it and
//! owns the optional maintenance thread. There is no global state: two
//! runtimes in one process are independent.

use crate::config::{Config, LogConfig, RuntimeConfig};
use crate::error::{Result, SeqlogError};
use crate::log::MappedLog;
use crate::sequence::Sequence;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

struct Registered {
    log: Weak<MappedLog>,
    preallocate: u64,
}

type Registry = Arc<Mutex<Vec<Registered>>>;

/// Owner of the maintenance thread and registry of open logs.
pub struct Runtime {
    config: RuntimeConfig,
    logs: Registry,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Create a runtime, starting the maintenance thread if enabled.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let logs: Registry = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let worker = if config.maintenance {
            let logs = Arc::clone(&logs);
            let stop = Arc::clone(&stop);
            let interval = config.interval();
            let handle = std::thread::Builder::new()
                .name("seqlog-maintenance".to_string())
                .spawn(move || {
                    tracing::debug!(interval_ms = interval.as_millis() as u64, "maintenance started");
                    while !stop.load(Ordering::Acquire) {
                        maintain(&logs);
                        std::thread::park_timeout(interval);
                    }
                    tracing::debug!("maintenance stopped");
                })
                .map_err(|e| SeqlogError::Maintenance {
                    cause: e.to_string(),
                })?;
            Some(handle)
        } else {
            None
        };

        Ok(Self {
            config,
            logs,
            stop,
            worker,
        })
    }

    /// A runtime without a background thread.
    pub fn deterministic() -> Self {
        Self {
            config: RuntimeConfig::deterministic(),
            logs: Arc::new(Mutex::new(Vec::new())),
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Options the runtime was created with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Whether a maintenance thread is running.
    pub fn has_maintenance(&self) -> bool {
        self.worker.is_some()
    }

    /// Open a log and register it for maintenance.
    pub fn open_log(&self, path: impl AsRef<Path>, config: &LogConfig) -> Result<Arc<MappedLog>> {
        let log = Arc::new(MappedLog::open(path, config)?);
        if !log.is_readonly() {
            self.logs.lock().push(Registered {
                log: Arc::downgrade(&log),
                preallocate: config.preallocate,
            });
            if let Some(worker) = &self.worker {
                worker.thread().unpark();
            }
        }
        Ok(log)
    }

    /// Open a log and wrap it in a [`Sequence`].
    pub fn open_sequence(&self, path: impl AsRef<Path>, config: &Config) -> Result<Sequence> {
        let log = self.open_log(path, &config.log)?;
        Ok(Sequence::new(log, config.sequence.clone()))
    }

    /// Run one maintenance pass on the calling thread.
    ///
    /// Returns the number of live registered logs.
    pub fn maintain_now(&self) -> usize {
        maintain(&self.logs)
    }

    /// Number of registered logs still alive.
    pub fn log_count(&self) -> usize {
        self.logs
            .lock()
            .iter()
            .filter(|r| r.log.strong_count() > 0)
            .count()
    }
}

fn maintain(logs: &Registry) -> usize {
    let live: Vec<_> = {
        let mut logs = logs.lock();
        logs.retain(|r| r.log.strong_count() > 0);
        logs.iter()
            .filter_map(|r| r.log.upgrade().map(|log| (log, r.preallocate)))
            .collect()
    };
    for (log, preallocate) in &live {
        if let Err(e) = log.maintain(*preallocate) {
            tracing::warn!(path = %log.path().display(), error = %e, "log maintenance failed");
        }
    }
    live.len()
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            worker.thread().unpark();
            if worker.join().is_err() {
                tracing::error!("maintenance thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .field("logs", &self.log_count())
            .field("maintenance", &self.has_maintenance())
            .finish()
    }
}
