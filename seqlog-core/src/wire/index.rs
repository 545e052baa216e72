//! Index records.

use super::truncated;
use crate::error::Result;
use crate::types::{Offset, StreamId};
use byteorder::{ByteOrder, LittleEndian};

/// Fixed part of an index payload.
pub const INDEX_HEADER_SIZE: usize = 16;

/// A decoded index record: an application key pointing at a data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry<'a> {
    /// Stream the indexed data belongs to.
    pub stream: StreamId,
    /// Offset of the indexed data record.
    pub data_offset: Offset,
    /// Application-defined index payload.
    pub payload: &'a [u8],
}

impl<'a> IndexEntry<'a> {
    /// Payload size of an encoded entry.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        INDEX_HEADER_SIZE + self.payload.len()
    }

    /// Encode into `buf`, which must be exactly [`encoded_len`](Self::encoded_len) bytes.
    pub fn encode_into(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(&mut buf[0..8], self.stream.as_u64());
        LittleEndian::write_u64(&mut buf[8..16], self.data_offset.as_u64());
        buf[INDEX_HEADER_SIZE..].copy_from_slice(self.payload);
    }

    /// Decode the payload of the record at `offset`.
    pub fn decode(offset: Offset, bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < INDEX_HEADER_SIZE {
            return Err(truncated("index", offset, bytes.len(), INDEX_HEADER_SIZE));
        }
        Ok(Self {
            stream: StreamId::new(LittleEndian::read_u64(&bytes[0..8])),
            data_offset: Offset::new(LittleEndian::read_u64(&bytes[8..16])),
            payload: &bytes[INDEX_HEADER_SIZE..],
        })
    }
}
