//! CLI command implementations.

pub mod copy;
pub mod inspect;
pub mod stats;
pub mod tail;
pub mod version;

use anyhow::{Context, Result};
use seqlog_core::{LogConfig, MappedLog, SeqlogError};
use std::path::Path;
use std::sync::Arc;

/// Open an existing log, accepting either closable mode.
pub(crate) fn open_existing(path: &Path, readonly: bool) -> Result<Arc<MappedLog>> {
    if !path.exists() {
        anyhow::bail!("Log file not found: {}", path.display());
    }
    let config = LogConfig::default().with_readonly(readonly);
    let log = match MappedLog::open(path, &config) {
        Err(SeqlogError::ClosableMismatch { .. }) => {
            MappedLog::open(path, &config.with_closable(true))
        }
        other => other,
    }
    .with_context(|| format!("Failed to open log: {}", path.display()))?;
    Ok(Arc::new(log))
}

/// Printable rendering of a payload: text when it is UTF-8, hex otherwise.
pub(crate) fn render_payload(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) if !text.chars().any(char::is_control) => format!("{:?}", text),
        _ => data.iter().map(|b| format!("{:02x}", b)).collect(),
    }
}
