//! Events delivered to cursor callbacks.

use crate::types::{ChannelId, Offset, PeerId, StreamId};
use std::rc::Rc;

/// A data record delivered by [`Cursor::poll`](super::Cursor::poll).
#[derive(Debug, Clone, Copy)]
pub struct DataEvent<'a> {
    /// Peer that owns the stream.
    pub peer: PeerId,
    /// Channel of the stream.
    pub channel: ChannelId,
    /// Stream the record was written to.
    pub stream: StreamId,
    /// Time supplied by the writer.
    pub time: i64,
    /// Payload bytes, borrowed from the mapping.
    pub data: &'a [u8],
    /// Offset of the data record.
    pub offset: Offset,
    /// Sequence number within the data sub-stream.
    pub seqno: u64,
}

/// A newly announced stream.
#[derive(Debug, Clone, Copy)]
pub struct StreamEvent<'a> {
    /// The stream id.
    pub stream: StreamId,
    /// Declaring peer.
    pub peer: PeerId,
    /// Channel of the stream.
    pub channel: ChannelId,
    /// Declaration time.
    pub time: i64,
    /// Payload encoding, empty when unspecified.
    pub encoding: &'a str,
}

/// Called for each data record of a channel.
pub type DataCallback = Rc<dyn Fn(&DataEvent<'_>)>;

/// Called once per newly announced peer.
pub type PeerCallback = Rc<dyn Fn(PeerId, &str)>;

/// Called once per newly announced channel name.
pub type ChannelCallback = Rc<dyn Fn(ChannelId, &str)>;

/// Called once per newly announced stream.
pub type StreamCallback = Rc<dyn Fn(&StreamEvent<'_>)>;

/// Called when a poll finds nothing to process.
pub type IdleCallback = Rc<dyn Fn()>;
