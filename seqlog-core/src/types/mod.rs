//! Core types for seqlog.
//!
//! - `Offset`: durable byte position of a record inside a log file
//! - `PeerId`, `ChannelId`: directory identifiers assigned on first declaration
//! - `StreamId`: a (peer, channel) pair, identified by its announcement offset

mod ids;
mod offset;

pub use ids::{CHANNEL_ID_BASE, ChannelId, PEER_ID_BASE, PeerId, StreamId};
pub use offset::Offset;
