//! Directory identifiers.

use super::Offset;
use serde::{Deserialize, Serialize};
use std::fmt;

/// First peer id handed out by a directory.
pub const PEER_ID_BASE: u64 = 0x100;

/// First channel id handed out by a directory.
///
/// Channel ids live in their own range so a peer id can never be mistaken
/// for a channel id.
pub const CHANNEL_ID_BASE: u64 = 0x1_0000_0000;

/// Identifier of a named peer.
///
/// Assigned in first-declaration order, starting at [`PEER_ID_BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(u64);

impl PeerId {
    /// Create a peer id from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Id of the `index`-th declared peer.
    #[must_use]
    pub(crate) const fn from_index(index: usize) -> Self {
        Self(PEER_ID_BASE + index as u64)
    }

    /// Position of this peer in declaration order, if the id is in range.
    pub(crate) fn index(&self) -> Option<usize> {
        self.0
            .checked_sub(PEER_ID_BASE)
            .filter(|i| *i < CHANNEL_ID_BASE - PEER_ID_BASE)
            .map(|i| i as usize)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer_{:#x}", self.0)
    }
}

/// Identifier of a named channel.
///
/// Assigned in first-declaration order, starting at [`CHANNEL_ID_BASE`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(u64);

impl ChannelId {
    /// Create a channel id from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub(crate) const fn from_index(index: usize) -> Self {
        Self(CHANNEL_ID_BASE + index as u64)
    }

    pub(crate) fn index(&self) -> Option<usize> {
        self.0.checked_sub(CHANNEL_ID_BASE).map(|i| i as usize)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "channel_{:#x}", self.0)
    }
}

/// Identifier of a (peer, channel) stream.
///
/// The value is the offset of the stream's canonical announcement record,
/// which makes it durable and identical across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(u64);

impl StreamId {
    /// Create a stream id from its raw value.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Offset of the announcement record that established this stream.
    #[must_use]
    pub const fn announcement(&self) -> Offset {
        Offset::new(self.0)
    }
}

impl From<Offset> for StreamId {
    fn from(offset: Offset) -> Self {
        Self(offset.as_u64())
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream_{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_and_channel_ranges_are_disjoint() {
        let peer = PeerId::from_index(3);
        assert_eq!(peer.as_u64(), 0x103);
        assert_eq!(peer.index(), Some(3));

        let channel = ChannelId::from_index(0);
        assert_eq!(channel.as_u64(), CHANNEL_ID_BASE);
        assert_eq!(PeerId::new(channel.as_u64()).index(), None);
        assert_eq!(ChannelId::new(peer.as_u64()).index(), None);
    }

    #[test]
    fn unknown_low_ids_have_no_index() {
        assert_eq!(PeerId::new(0).index(), None);
        assert_eq!(PeerId::new(PEER_ID_BASE - 1).index(), None);
    }

    #[test]
    fn stream_id_is_announcement_offset() {
        let stream = StreamId::from(Offset::new(184));
        assert_eq!(stream.announcement(), Offset::new(184));
        assert_eq!(stream.to_string(), "stream_0xb8");
    }
}
