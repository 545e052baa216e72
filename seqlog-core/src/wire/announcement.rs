//! Peer and stream announcements.

use super::truncated;
use crate::error::{Result, SeqlogError};
use crate::types::Offset;
use byteorder::{ByteOrder, LittleEndian};

/// Fixed part of an announcement payload.
pub const ANNOUNCEMENT_HEADER_SIZE: usize = 24;

/// Payload offset of the atomic subscription marker.
pub const SUBSCRIBED_FIELD: u64 = 0;

/// Longest peer or channel name the format can carry.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// A decoded announcement.
///
/// An empty `channel` announces a peer; otherwise the record announces the
/// stream (`peer`, `channel`) and, when the channel name is new, the
/// channel itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announcement<'a> {
    /// Declaration time supplied by the writer.
    pub time: i64,
    /// Declaring peer.
    pub peer: &'a str,
    /// Channel name, empty for peer announcements.
    pub channel: &'a str,
    /// Free-form payload encoding of the stream.
    pub encoding: &'a str,
}

impl<'a> Announcement<'a> {
    /// Announcement of a peer.
    #[must_use]
    pub fn peer(peer: &'a str) -> Self {
        Self {
            time: 0,
            peer,
            channel: "",
            encoding: "",
        }
    }

    /// Announcement of the stream (`peer`, `channel`).
    #[must_use]
    pub fn stream(peer: &'a str, channel: &'a str, encoding: &'a str, time: i64) -> Self {
        Self {
            time,
            peer,
            channel,
            encoding,
        }
    }

    /// Whether this announces a peer rather than a stream.
    #[must_use]
    pub fn is_peer(&self) -> bool {
        self.channel.is_empty()
    }

    /// Payload size of the encoded announcement.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        ANNOUNCEMENT_HEADER_SIZE + self.peer.len() + self.channel.len() + self.encoding.len()
    }

    /// Encode into `buf`, which must be exactly [`encoded_len`](Self::encoded_len) bytes.
    ///
    /// The subscription marker is left zero.
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert_eq!(buf.len(), self.encoded_len());
        LittleEndian::write_u64(&mut buf[0..8], 0);
        LittleEndian::write_i64(&mut buf[8..16], self.time);
        LittleEndian::write_u16(&mut buf[16..18], self.peer.len() as u16);
        LittleEndian::write_u16(&mut buf[18..20], self.channel.len() as u16);
        LittleEndian::write_u32(&mut buf[20..24], 0);

        let mut pos = ANNOUNCEMENT_HEADER_SIZE;
        for part in [self.peer, self.channel, self.encoding] {
            buf[pos..pos + part.len()].copy_from_slice(part.as_bytes());
            pos += part.len();
        }
    }

    /// Decode the payload of the record at `offset`.
    pub fn decode(offset: Offset, bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < ANNOUNCEMENT_HEADER_SIZE {
            return Err(truncated(
                "announcement",
                offset,
                bytes.len(),
                ANNOUNCEMENT_HEADER_SIZE,
            ));
        }
        let time = LittleEndian::read_i64(&bytes[8..16]);
        let peer_len = LittleEndian::read_u16(&bytes[16..18]) as usize;
        let channel_len = LittleEndian::read_u16(&bytes[18..20]) as usize;

        let names_end = ANNOUNCEMENT_HEADER_SIZE + peer_len + channel_len;
        if bytes.len() < names_end {
            return Err(truncated("announcement", offset, bytes.len(), names_end));
        }
        let text = |range: std::ops::Range<usize>, what: &str| {
            std::str::from_utf8(&bytes[range]).map_err(|e| SeqlogError::MalformedRecord {
                kind: "announcement",
                offset,
                cause: format!("{} is not UTF-8: {}", what, e),
            })
        };

        let peer_end = ANNOUNCEMENT_HEADER_SIZE + peer_len;
        let peer = text(ANNOUNCEMENT_HEADER_SIZE..peer_end, "peer name")?;
        let channel = text(peer_end..names_end, "channel name")?;
        let encoding = text(names_end..bytes.len(), "encoding")?;
        if peer.is_empty() {
            return Err(SeqlogError::MalformedRecord {
                kind: "announcement",
                offset,
                cause: "empty peer name".to_string(),
            });
        }

        Ok(Self {
            time,
            peer,
            channel,
            encoding,
        })
    }
}
