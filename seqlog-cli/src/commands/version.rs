//! Version command - show version information.

use anyhow::Result;
use seqlog_core::sequence::SEQUENCE_API_VERSION;

/// Version information.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the version command.
pub fn run() -> Result<()> {
    println!("seqlog - memory-mapped sequence log");
    println!();
    println!("Version:     {}", VERSION);
    println!("API table:   v{}", SEQUENCE_API_VERSION);
    println!(
        "Platform:    {} / {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!();
    println!("Components:");
    println!("  seqlog-core    Mapped log, directory, cursor, sequence");
    println!("  seqlog-cli     Command-line interface");

    Ok(())
}
