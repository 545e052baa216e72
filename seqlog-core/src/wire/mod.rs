//! Payload formats of the four sub-streams.
//!
//! Each codec works on a record's payload bytes. Integers are
//! little-endian; names and encodings are UTF-8.
//!
//! ```text
//! announcement  [subscribed: u64][time: i64][peer_len: u16][channel_len: u16][reserved: u32]
//!               [peer][channel][encoding]
//! data          [stream: u64][time: i64][payload]
//! subscription  [stream: u64][payload]
//! index         [stream: u64][data_offset: u64][payload]
//! ```
//!
//! The `subscribed` word of an announcement is the only field mutated after
//! commit: it is set once, atomically, to the offset of the first
//! subscription record for the stream.

mod announcement;
mod data;
mod index;
mod subscription;

pub use announcement::{ANNOUNCEMENT_HEADER_SIZE, Announcement, MAX_NAME_LEN, SUBSCRIBED_FIELD};
pub use data::{DATA_HEADER_SIZE, DataMessage};
pub use index::{INDEX_HEADER_SIZE, IndexEntry};
pub use subscription::{SUBSCRIPTION_HEADER_SIZE, SubscriptionMessage};

use crate::error::SeqlogError;
use crate::types::Offset;

fn truncated(kind: &'static str, offset: Offset, len: usize, needed: usize) -> SeqlogError {
    SeqlogError::MalformedRecord {
        kind,
        offset,
        cause: format!("payload is {} bytes, at least {} expected", len, needed),
    }
}
