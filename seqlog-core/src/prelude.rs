//! Prelude for convenient imports.
//!
//! ```ignore
//! use seqlog_core::prelude::*;
//! ```

// Core types
pub use crate::types::{ChannelId, Offset, PeerId, StreamId};

// Error handling
pub use crate::error::{Result, SeqlogError};

// Configuration
pub use crate::config::{Config, LogConfig, RuntimeConfig, SequenceConfig};

// Log
pub use crate::log::{Iter, Linked, MappedLog, Record, Reservation, SubStream};

// Naming and dispatch
pub use crate::cursor::{
    ChannelCallback, Cursor, DataCallback, DataEvent, IdleCallback, PeerCallback, StreamCallback,
    StreamEvent,
};
pub use crate::directory::{Directory, StreamInfo};
pub use crate::glob::PrefixRouter;

// Handles
pub use crate::runtime::Runtime;
pub use crate::sequence::{DataReservation, IndexRecord, Sequence, SequenceApi, WeakSequence};
