//! Error types for seqlog.
//!
//! Every failure crosses the public boundary as a [`SeqlogError`] value.
//! Variants carry the path, offset, name or id needed to diagnose them.
//! Reaching the end of a sub-stream is not an error: iteration returns
//! `None` and `poll` returns `false`.

use crate::log::SubStream;
use crate::types::{ChannelId, Offset, PeerId, StreamId};
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for seqlog operations.
#[derive(Error, Debug)]
pub enum SeqlogError {
    // =========================================================================
    // Log Errors (E001-E099)
    // =========================================================================
    /// Failed to open or size the log file.
    #[error("E001: Failed to open log at {path}: {cause}")]
    LogOpen {
        /// The path of the log file.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },

    /// Failed to memory-map a page of the log file.
    #[error("E002: Failed to mmap page {page} of log at {path}: {cause}")]
    LogMmap {
        /// The path of the log file.
        path: PathBuf,
        /// Index of the page being mapped.
        page: u64,
        /// Reason for the mmap failure.
        cause: String,
    },

    /// The file does not carry the expected magic marker.
    #[error("E003: Invalid log file format at {path}: {cause}")]
    InvalidFormat {
        /// The path of the log file.
        path: PathBuf,
        /// What was found instead.
        cause: String,
    },

    /// The configured closable mode differs from the one stored in the file.
    #[error(
        "E004: Closable mode mismatch for {path}: configured closable={configured}, file closable={found}"
    )]
    ClosableMismatch {
        /// The path of the log file.
        path: PathBuf,
        /// Mode requested by the caller.
        configured: bool,
        /// Mode stored in the file.
        found: bool,
    },

    /// A mutating call was made on a read-only log.
    #[error("E005: Unable to {operation} using a read-only log")]
    ReadOnly {
        /// The rejected operation.
        operation: &'static str,
    },

    /// A reservation of zero bytes was requested.
    #[error("E006: Reservation size is zero")]
    EmptyReservation,

    /// A single record cannot exceed one page.
    #[error("E007: Reservation of {requested} bytes exceeds the maximum record size of {max} bytes")]
    ReservationTooLarge {
        /// Number of payload bytes requested.
        requested: u64,
        /// Largest payload that fits in a page.
        max: u64,
    },

    /// The log reached its maximum number of pages.
    #[error("E008: Log capacity exceeded at offset {offset}: at most {max_pages} pages can be mapped")]
    Capacity {
        /// Offset that could not be mapped.
        offset: Offset,
        /// Maximum number of pages.
        max_pages: u64,
    },

    /// An offset that does not name a live record.
    #[error("E009: Invalid offset {offset}: {cause}")]
    InvalidOffset {
        /// The invalid offset.
        offset: Offset,
        /// Reason why the offset is invalid.
        cause: String,
    },

    /// The record has already been unlinked.
    #[error("E010: Record at {offset} was already removed")]
    AlreadyRemoved {
        /// Offset of the removed record.
        offset: Offset,
    },

    /// The sub-stream has been closed and accepts no more records.
    #[error("E011: Sub-stream {sub_stream} is closed")]
    Closed {
        /// The closed sub-stream.
        sub_stream: SubStream,
    },

    /// `close` was called on a log opened without closable mode.
    #[error("E012: Unable to close a non-closable sub-stream {sub_stream}")]
    NotClosable {
        /// The sub-stream that was to be closed.
        sub_stream: SubStream,
    },

    /// Flushing mapped pages to disk failed.
    #[error("E013: Failed to flush log at {path}: {cause}")]
    LogFlush {
        /// The path of the log file.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },

    // =========================================================================
    // Directory and Wire Errors (E101-E199)
    // =========================================================================
    /// Reverse lookup of an unknown peer id.
    #[error("E101: Peer {peer} not found")]
    PeerNotFound {
        /// The unknown peer.
        peer: PeerId,
    },

    /// Reverse lookup of an unknown channel id.
    #[error("E102: Channel {channel} not found")]
    ChannelNotFound {
        /// The unknown channel.
        channel: ChannelId,
    },

    /// A data record references a stream that was never announced.
    #[error("E103: Data record at {offset} references unknown stream {stream}")]
    UnknownStream {
        /// Offset of the data record.
        offset: Offset,
        /// The unresolved stream id.
        stream: StreamId,
    },

    /// A record payload could not be decoded.
    #[error("E104: Malformed {kind} record at {offset}: {cause}")]
    MalformedRecord {
        /// Kind of record being decoded.
        kind: &'static str,
        /// Offset of the record.
        offset: Offset,
        /// Decoding failure.
        cause: String,
    },

    /// A stream was redeclared with a different encoding.
    #[error("E105: Encoding mismatch for channel '{channel}': declared '{declared}', requested '{requested}'")]
    EncodingMismatch {
        /// Channel name.
        channel: String,
        /// Encoding stored in the log.
        declared: String,
        /// Encoding requested by the caller.
        requested: String,
    },

    /// A peer or channel name is empty or too long for the wire format.
    #[error("E106: Invalid name '{name}': {cause}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        cause: String,
    },

    // =========================================================================
    // Cursor Errors (E201-E299)
    // =========================================================================
    /// `consume` was called on cursors at different positions.
    #[error(
        "E201: Cursor positions differ: destination at {dest_data}/{dest_announcements}, source at {src_data}/{src_announcements}"
    )]
    CursorMismatch {
        /// Data position of the destination cursor.
        dest_data: Offset,
        /// Announcement position of the destination cursor.
        dest_announcements: Offset,
        /// Data position of the source cursor.
        src_data: Offset,
        /// Announcement position of the source cursor.
        src_announcements: Offset,
    },

    // =========================================================================
    // Configuration Errors (E301-E399)
    // =========================================================================
    /// Failed to read a configuration file.
    #[error("E301: Failed to read config {path}: {cause}")]
    ConfigRead {
        /// The configuration path.
        path: PathBuf,
        /// Reason for the failure.
        cause: String,
    },

    /// Failed to parse YAML configuration.
    #[error("E302: Failed to parse config {origin}: {cause}")]
    ConfigParse {
        /// Where the configuration came from (a path or `<inline>`).
        origin: String,
        /// Parser error.
        cause: String,
    },

    /// The maintenance thread could not be started.
    #[error("E303: Failed to start maintenance thread: {cause}")]
    Maintenance {
        /// Reason for the failure.
        cause: String,
    },
}

/// Result type alias for seqlog operations.
pub type Result<T> = std::result::Result<T, SeqlogError>;

impl SeqlogError {
    /// Get the error code (e.g., "E001").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::LogOpen { .. } => "E001",
            Self::LogMmap { .. } => "E002",
            Self::InvalidFormat { .. } => "E003",
            Self::ClosableMismatch { .. } => "E004",
            Self::ReadOnly { .. } => "E005",
            Self::EmptyReservation => "E006",
            Self::ReservationTooLarge { .. } => "E007",
            Self::Capacity { .. } => "E008",
            Self::InvalidOffset { .. } => "E009",
            Self::AlreadyRemoved { .. } => "E010",
            Self::Closed { .. } => "E011",
            Self::NotClosable { .. } => "E012",
            Self::LogFlush { .. } => "E013",
            Self::PeerNotFound { .. } => "E101",
            Self::ChannelNotFound { .. } => "E102",
            Self::UnknownStream { .. } => "E103",
            Self::MalformedRecord { .. } => "E104",
            Self::EncodingMismatch { .. } => "E105",
            Self::InvalidName { .. } => "E106",
            Self::CursorMismatch { .. } => "E201",
            Self::ConfigRead { .. } => "E301",
            Self::ConfigParse { .. } => "E302",
            Self::Maintenance { .. } => "E303",
        }
    }

    /// Check if this error leaves the object unusable.
    ///
    /// Fatal errors are raised while opening a log. Every other error is
    /// per-call and the object remains usable.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LogOpen { .. }
                | Self::LogMmap { .. }
                | Self::InvalidFormat { .. }
                | Self::ClosableMismatch { .. }
        )
    }

    /// Check if this error is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigRead { .. } | Self::ConfigParse { .. } | Self::ClosableMismatch { .. }
        )
    }
}
