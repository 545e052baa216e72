//! Data records.

use super::truncated;
use crate::error::Result;
use crate::types::{Offset, StreamId};
use byteorder::{ByteOrder, LittleEndian};

/// Fixed part of a data payload.
pub const DATA_HEADER_SIZE: usize = 16;

/// A decoded data record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataMessage<'a> {
    /// Stream the record belongs to.
    pub stream: StreamId,
    /// Writer-supplied timestamp.
    pub time: i64,
    /// Application payload.
    pub payload: &'a [u8],
}

impl<'a> DataMessage<'a> {
    /// Write the fixed header into the first [`DATA_HEADER_SIZE`] bytes of `buf`.
    pub fn encode_header(buf: &mut [u8], stream: StreamId, time: i64) {
        LittleEndian::write_u64(&mut buf[0..8], stream.as_u64());
        LittleEndian::write_i64(&mut buf[8..16], time);
    }

    /// Decode the payload of the record at `offset`.
    pub fn decode(offset: Offset, bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < DATA_HEADER_SIZE {
            return Err(truncated("data", offset, bytes.len(), DATA_HEADER_SIZE));
        }
        Ok(Self {
            stream: StreamId::new(LittleEndian::read_u64(&bytes[0..8])),
            time: LittleEndian::read_i64(&bytes[8..16]),
            payload: &bytes[DATA_HEADER_SIZE..],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_header() {
        let mut buf = vec![0u8; DATA_HEADER_SIZE + 4];
        DataMessage::encode_header(&mut buf, StreamId::new(0x98), -5);
        buf[DATA_HEADER_SIZE..].copy_from_slice(b"ABCD");

        let msg = DataMessage::decode(Offset::new(512), &buf).unwrap();
        assert_eq!(msg.stream, StreamId::new(0x98));
        assert_eq!(msg.time, -5);
        assert_eq!(msg.payload, b"ABCD");
    }

    #[test]
    fn truncated_data() {
        assert!(DataMessage::decode(Offset::new(512), &[1, 2, 3]).is_err());
    }
}
