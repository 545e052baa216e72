//! seqlog CLI - operational tools over seqlog files.

mod commands;
mod logging;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// seqlog - inspect, follow and copy memory-mapped sequence logs.
#[derive(Parser)]
#[command(name = "seqlog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print announcements and data records as they are read
    Tail {
        /// Path to the log file
        file: PathBuf,

        /// Keep polling for new records
        #[arg(short, long)]
        follow: bool,

        /// Only print data of channels under this prefix
        #[arg(short, long, default_value = "/")]
        prefix: String,

        /// Start at the current end of the log
        #[arg(long)]
        from_end: bool,

        /// Poll interval in milliseconds when following
        #[arg(long, default_value = "100")]
        interval_ms: u64,
    },

    /// Show record counts and directory contents
    Stats {
        /// Path to the log file
        file: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show the file header and sub-stream roots
    Inspect {
        /// Path to the log file
        file: PathBuf,
    },

    /// Replay every data record of one log into another
    Copy {
        /// Source log
        src: PathBuf,

        /// Destination log, created if missing
        dst: PathBuf,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose)?;

    match cli.command {
        Commands::Tail {
            file,
            follow,
            prefix,
            from_end,
            interval_ms,
        } => commands::tail::run(
            &file,
            &commands::tail::TailOptions {
                follow,
                prefix,
                from_end,
                interval: std::time::Duration::from_millis(interval_ms),
            },
        ),
        Commands::Stats { file, json } => commands::stats::run(&file, json),
        Commands::Inspect { file } => commands::inspect::run(&file),
        Commands::Copy { src, dst } => commands::copy::run(&src, &dst),
        Commands::Version => commands::version::run(),
    }
}
