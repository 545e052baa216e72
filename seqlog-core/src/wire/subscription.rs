//! Subscription and directory messages.

use super::truncated;
use crate::error::Result;
use crate::types::{Offset, StreamId};
use byteorder::{ByteOrder, LittleEndian};

/// Fixed part of a subscription payload.
pub const SUBSCRIPTION_HEADER_SIZE: usize = 8;

/// A decoded record of the subscriptions sub-stream.
///
/// A zero stream marks a free-form directory message carried in `payload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionMessage<'a> {
    /// Subscribed stream, or `None` for a directory message.
    pub stream: Option<StreamId>,
    /// Directory message bytes.
    pub payload: &'a [u8],
}

impl<'a> SubscriptionMessage<'a> {
    /// Payload size of an encoded message.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        SUBSCRIPTION_HEADER_SIZE + self.payload.len()
    }

    /// Encode into `buf`, which must be exactly [`encoded_len`](Self::encoded_len) bytes.
    pub fn encode_into(&self, buf: &mut [u8]) {
        let stream = self.stream.map(|s| s.as_u64()).unwrap_or(0);
        LittleEndian::write_u64(&mut buf[0..8], stream);
        buf[SUBSCRIPTION_HEADER_SIZE..].copy_from_slice(self.payload);
    }

    /// Decode the payload of the record at `offset`.
    pub fn decode(offset: Offset, bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < SUBSCRIPTION_HEADER_SIZE {
            return Err(truncated(
                "subscription",
                offset,
                bytes.len(),
                SUBSCRIPTION_HEADER_SIZE,
            ));
        }
        let stream = LittleEndian::read_u64(&bytes[0..8]);
        Ok(Self {
            stream: (stream != 0).then(|| StreamId::new(stream)),
            payload: &bytes[SUBSCRIPTION_HEADER_SIZE..],
        })
    }
}
