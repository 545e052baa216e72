//! Inspect command - dump the file header and sub-stream roots.

use super::open_existing;
use anyhow::{Context, Result};
use seqlog_core::SubStream;
use std::path::Path;

/// Run the inspect command.
pub fn run(path: &Path) -> Result<()> {
    tracing::info!(path = %path.display(), "Inspecting log");

    let log = open_existing(path, true)?;
    let header = log.header().context("Failed to read header")?;

    println!("Log Header");
    println!("==========");
    println!("Path:       {}", log.path().display());
    println!("Magic:      {}", String::from_utf8_lossy(&header.magic));
    println!(
        "Closable:   {} (raw {})",
        if header.is_closable() { "yes" } else { "no" },
        header.closable
    );
    println!("Reserved:   {} bytes", header.reserved);
    println!("File size:  {} bytes", log.file_len()?);
    println!();

    println!(
        "{:<15} {:>10} {:>12} {:>12} {:>12} {:>7}",
        "SUB-STREAM", "SENTINEL", "FIRST", "TAIL HINT", "TAIL", "CLOSED"
    );
    for sub in SubStream::ALL {
        let root = header.sentinel(sub);
        let tail = log
            .end(sub)
            .with_context(|| format!("Failed to find tail of {} sub-stream", sub))?;
        println!(
            "{:<15} {:>10} {:>12} {:>12} {:>12} {:>7}",
            sub.name(),
            sub.sentinel().as_u64(),
            root.first,
            root.tail_hint,
            log.tell(tail).as_u64(),
            if log.is_closed(sub)? { "yes" } else { "no" }
        );
    }

    Ok(())
}
