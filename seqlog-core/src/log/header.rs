//! File header layout and sub-stream roots.

use crate::types::Offset;
use byteorder::{LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read};

/// Magic marker stored in the first eight bytes of every log file.
pub const LOG_MAGIC: [u8; 8] = *b"SEQLOG01";

/// Size of one mapped page. Records never straddle a page boundary.
pub const PAGE_SIZE: u64 = 8 * 1024 * 1024;

/// Default number of bytes mapped ahead of the write frontier.
pub const PREALLOC_SIZE: u64 = 3 * 1024 * 1024;

/// Maximum number of pages a single log can map.
pub const MAX_PAGES: usize = 16 * 1024;

/// Number of independent sub-streams multiplexed in one log.
pub const SUB_STREAM_COUNT: usize = 4;

/// Size of a record header: `size`, `next`, `prev`, `seqno`.
pub const NODE_HEADER_SIZE: u64 = 32;

/// Record payloads are padded to this alignment.
pub const WORD_SIZE: u64 = 8;

pub(crate) const MAGIC_OFFSET: u64 = 0;
pub(crate) const CLOSABLE_OFFSET: u64 = 8;
pub(crate) const RESERVED_OFFSET: u64 = 16;
pub(crate) const SENTINELS_OFFSET: u64 = 24;

/// Total size of the fixed file header. The first record starts here.
pub const HEADER_SIZE: u64 = SENTINELS_OFFSET + NODE_HEADER_SIZE * SUB_STREAM_COUNT as u64;

pub(crate) const NODE_SIZE_FIELD: u64 = 0;
pub(crate) const NODE_NEXT_FIELD: u64 = 8;
pub(crate) const NODE_PREV_FIELD: u64 = 16;
pub(crate) const NODE_SEQNO_FIELD: u64 = 24;

/// The high byte of a linked record's size word holds its sub-stream tag
/// (`sub + 1`); zero while the record is floating.
pub(crate) const NODE_TAG_SHIFT: u32 = 56;
pub(crate) const NODE_SIZE_MASK: u64 = (1 << NODE_TAG_SHIFT) - 1;

/// Value of the closable word: zero means not yet initialized.
pub(crate) const CLOSABLE_NO: u64 = 1;
pub(crate) const CLOSABLE_YES: u64 = 2;

/// Largest payload that fits in a single record.
pub const MAX_PAYLOAD_SIZE: u64 = PAGE_SIZE - NODE_HEADER_SIZE;

/// Round `size` up to the record alignment.
#[must_use]
pub const fn word_ceil(size: u64) -> u64 {
    (size + WORD_SIZE - 1) & !(WORD_SIZE - 1)
}

/// One of the logical chains sharing a physical log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SubStream {
    /// Data records.
    Data = 0,
    /// Peer and stream announcements.
    Announcements = 1,
    /// Subscription markers and directory messages.
    Subscriptions = 2,
    /// Index records pointing back into the data sub-stream.
    Index = 3,
}

impl SubStream {
    /// All sub-streams in header order.
    pub const ALL: [SubStream; SUB_STREAM_COUNT] = [
        SubStream::Data,
        SubStream::Announcements,
        SubStream::Subscriptions,
        SubStream::Index,
    ];

    /// Offset of this sub-stream's sentinel root record.
    ///
    /// The sentinel is both the list root and its terminal marker.
    #[must_use]
    pub const fn sentinel(self) -> Offset {
        Offset::new(SENTINELS_OFFSET + NODE_HEADER_SIZE * self as u64)
    }

    /// Sub-stream whose sentinel lives at `offset`, if any.
    #[must_use]
    pub fn from_sentinel(offset: Offset) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.sentinel() == offset)
    }

    /// Tag stored in the size word of records linked into this sub-stream.
    pub(crate) const fn tag(self) -> u64 {
        (self as u64 + 1) << NODE_TAG_SHIFT
    }

    /// Sub-stream named by the tag bits of a size word.
    pub(crate) fn from_size_word(word: u64) -> Option<Self> {
        match word >> NODE_TAG_SHIFT {
            0 => None,
            tag => u8::try_from(tag - 1).ok().and_then(|i| Self::try_from(i).ok()),
        }
    }

    /// Short lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            SubStream::Data => "data",
            SubStream::Announcements => "announcements",
            SubStream::Subscriptions => "subscriptions",
            SubStream::Index => "index",
        }
    }
}

impl fmt::Display for SubStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for SubStream {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL.get(value as usize).copied().ok_or(value)
    }
}

/// Snapshot of a sentinel root record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SentinelSnapshot {
    /// First record of the sub-stream, zero when empty.
    pub first: u64,
    /// Cached tail. Equal to the sentinel itself when nothing was committed.
    pub tail_hint: u64,
}

/// Point-in-time copy of the file header, decoded with an explicit byte
/// order. Used by tooling and by format validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogHeader {
    /// Magic marker bytes.
    pub magic: [u8; 8],
    /// Raw closable word (0 = uninitialized, 1 = no, 2 = yes).
    pub closable: u64,
    /// High-water mark of reserved bytes.
    pub reserved: u64,
    /// Sentinel roots in [`SubStream::ALL`] order.
    pub sentinels: [SentinelSnapshot; SUB_STREAM_COUNT],
}

impl LogHeader {
    /// Decode the header from the first [`HEADER_SIZE`] bytes of a log.
    pub fn from_bytes(bytes: &[u8]) -> io::Result<Self> {
        if bytes.len() < HEADER_SIZE as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "Buffer too small for header",
            ));
        }

        let mut cursor = io::Cursor::new(bytes);

        let mut magic = [0u8; 8];
        cursor.read_exact(&mut magic)?;
        let closable = cursor.read_u64::<LittleEndian>()?;
        let reserved = cursor.read_u64::<LittleEndian>()?;

        let mut sentinels = [SentinelSnapshot {
            first: 0,
            tail_hint: 0,
        }; SUB_STREAM_COUNT];
        for sentinel in &mut sentinels {
            let _size = cursor.read_u64::<LittleEndian>()?;
            sentinel.first = cursor.read_u64::<LittleEndian>()?;
            sentinel.tail_hint = cursor.read_u64::<LittleEndian>()?;
            let _seqno = cursor.read_u64::<LittleEndian>()?;
        }

        Ok(Self {
            magic,
            closable,
            reserved,
            sentinels,
        })
    }

    /// Validate the magic marker.
    pub fn validate(&self) -> Result<(), String> {
        if self.magic == [0u8; 8] {
            return Err("file is not initialized".to_string());
        }
        if self.magic != LOG_MAGIC {
            return Err(format!(
                "unexpected magic {:?}",
                String::from_utf8_lossy(&self.magic)
            ));
        }
        Ok(())
    }

    /// Whether the file was created in closable mode.
    #[must_use]
    pub fn is_closable(&self) -> bool {
        self.closable == CLOSABLE_YES
    }

    /// Snapshot of the sentinel for `sub`.
    #[must_use]
    pub fn sentinel(&self, sub: SubStream) -> SentinelSnapshot {
        self.sentinels[sub as usize]
    }
}
