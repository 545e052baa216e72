//! seqlog core library
//!
//! A memory-mapped, append-only log shared between threads and processes,
//! with a naming and subscription layer rebuilt from the log itself.
//!
//! # Overview
//!
//! Writers reserve space, fill it, and commit it to one of four
//! sub-streams with a single compare-and-swap. Readers walk the
//! sub-streams by offset. Offsets are durable: a position saved with
//! `tell` resumes with `seek` after a restart, in any process.
//!
//! # Key Components
//!
//! - **Log**: page-backed mapped file with lock-free reserve/commit
//! - **Wire**: payload formats of the data, announcement, subscription
//!   and index sub-streams
//! - **Directory**: peer/channel/stream names replayed from announcements
//! - **Cursor**: ordered dispatch of announcements and data to callbacks,
//!   including hierarchical prefix subscriptions
//! - **Sequence**: reference-counted handle bundling log, cursor and directory
//! - **Runtime**: explicit context owning the maintenance thread
//!
//! # Example
//!
//! ```no_run
//! use seqlog_core::prelude::*;
//! use std::rc::Rc;
//!
//! # fn main() -> seqlog_core::Result<()> {
//! let runtime = Runtime::new(RuntimeConfig::default())?;
//! let seq = runtime.open_sequence("/tmp/example.seqlog", &Config::default())?;
//!
//! let producer = seq.peer_declare("producer1")?;
//! let channel = seq.channel_declare(producer, 0, "main/channel1")?;
//! seq.prefix_subscribe("main/", Rc::new(|event: &DataEvent<'_>| {
//!     println!("{} bytes at {}", event.data.len(), event.offset);
//! }))?;
//!
//! seq.write(producer, channel, 1000, b"ABCD")?;
//! while seq.poll()? {}
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod callbacks;
pub mod config;
pub mod cursor;
pub mod directory;
pub mod error;
pub mod glob;
pub mod log;
pub mod prelude;
pub mod runtime;
pub mod sequence;
pub mod types;
pub mod wire;

// Re-export key types at crate root for convenience
pub use config::{Config, LogConfig, RuntimeConfig, SequenceConfig};
pub use cursor::{Cursor, DataCallback, DataEvent, StreamEvent};
pub use directory::{Directory, StreamInfo};
pub use error::{Result, SeqlogError};
pub use log::{Iter, MappedLog, SubStream};
pub use runtime::Runtime;
pub use sequence::{Sequence, SequenceApi, WeakSequence};
pub use types::{ChannelId, Offset, PeerId, StreamId};
