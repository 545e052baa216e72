//! Memory-mapped append-only log.
//!
//! One physical file holds several independent singly-linked sub-streams.
//! Every record is addressed by its byte offset, which is identical in
//! every process mapping the file.
//!
//! # Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │ magic "SEQLOG01" │ closable │ reserved (high-water mark)        │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ sentinel[data] │ sentinel[announcements] │ sentinel[subs] │ ... │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ Records (page-aligned growth, never straddling a page)          │
//! │ ┌─────────────────────────────────────────────────────────────┐ │
//! │ │ [size: u64][next: u64][prev: u64][seqno: u64][payload...]   │ │
//! │ ├─────────────────────────────────────────────────────────────┤ │
//! │ │ ...                                                         │ │
//! │ └─────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. The high byte of `size` tags a linked
//! record with its sub-stream, so a saved offset can be checked against
//! the sub-stream it is used with. A sentinel is both the root of its
//! sub-stream and its terminal marker: a tail whose next-link holds the
//! sentinel's own offset marks a closed sub-stream.
//!
//! # Concurrency
//!
//! Reservation and commit are lock-free across threads and processes.
//! A mutex guards only the mapping of new pages.

mod header;
mod mapped;
mod region;

pub use header::{
    HEADER_SIZE, LOG_MAGIC, LogHeader, MAX_PAGES, MAX_PAYLOAD_SIZE, NODE_HEADER_SIZE, PAGE_SIZE,
    PREALLOC_SIZE, SUB_STREAM_COUNT, SentinelSnapshot, SubStream, word_ceil,
};
pub use mapped::{Iter, Linked, MappedLog, Record, Reservation};
