//! The sequence handle: one log, one cursor, one directory.
//!
//! [`Sequence`] is what embedders hold. It is reference counted: cloning
//! the handle shares the same cursor and callbacks, and the cursor is
//! dropped with the last handle. [`SequenceApi`] exposes the same entry
//! points as a versioned table of function pointers.

mod api;

pub use api::{SEQUENCE_API_V1, SEQUENCE_API_VERSION, SequenceApi};

use crate::config::{Config, SequenceConfig};
use crate::cursor::{
    ChannelCallback, Cursor, DataCallback, IdleCallback, PeerCallback, StreamCallback,
};
use crate::error::Result;
use crate::log::{MappedLog, Reservation, SubStream};
use crate::types::{ChannelId, Offset, PeerId, StreamId};
use crate::wire::{DATA_HEADER_SIZE, DataMessage, IndexEntry};
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::rc::{Rc, Weak};
use std::sync::Arc;

struct SequenceInner {
    cursor: Cursor,
    config: SequenceConfig,
}

/// Reference-counted handle over a log and its cursor.
#[derive(Clone)]
pub struct Sequence {
    inner: Rc<SequenceInner>,
}

/// A non-owning [`Sequence`] reference.
#[derive(Clone)]
pub struct WeakSequence {
    inner: Weak<SequenceInner>,
}

impl WeakSequence {
    /// The sequence, if a strong handle is still alive.
    pub fn upgrade(&self) -> Option<Sequence> {
        self.inner.upgrade().map(|inner| Sequence { inner })
    }
}

/// Payload space for one data record.
///
/// Obtained from [`Sequence::reserve`]; the record is invisible until
/// passed to [`Sequence::commit`].
pub struct DataReservation<'a> {
    reservation: Reservation<'a>,
}

impl DataReservation<'_> {
    /// Offset the record will have once committed.
    pub fn offset(&self) -> Offset {
        self.reservation.offset()
    }
}

impl Deref for DataReservation<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.reservation[DATA_HEADER_SIZE..]
    }
}

impl DerefMut for DataReservation<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.reservation[DATA_HEADER_SIZE..]
    }
}

/// An index record, copied out of the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRecord {
    /// Offset of the index record itself.
    pub offset: Offset,
    /// Stream the entry refers to.
    pub stream: StreamId,
    /// Data record the entry points at.
    pub data_offset: Offset,
    /// Caller-defined key bytes.
    pub payload: Vec<u8>,
}

impl Sequence {
    /// Sequence reading `log` from the first data record.
    pub fn new(log: Arc<MappedLog>, config: SequenceConfig) -> Self {
        Self::from_cursor(Cursor::new(log), config)
    }

    /// Sequence reading `log` from its current end.
    pub fn at_end(log: Arc<MappedLog>, config: SequenceConfig) -> Result<Self> {
        Ok(Self::from_cursor(Cursor::at_end(log)?, config))
    }

    /// Open the log at `path` without a runtime.
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let log = Arc::new(MappedLog::open(path, &config.log)?);
        Ok(Self::new(log, config.sequence.clone()))
    }

    fn from_cursor(cursor: Cursor, config: SequenceConfig) -> Self {
        cursor.set_mark_subscriptions(config.announce_subscriptions);
        Self {
            inner: Rc::new(SequenceInner { cursor, config }),
        }
    }

    /// Number of live strong handles.
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    /// A weak handle that does not keep the sequence alive.
    pub fn downgrade(&self) -> WeakSequence {
        WeakSequence {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Whether two handles share one sequence.
    pub fn ptr_eq(&self, other: &Sequence) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The underlying log.
    pub fn log(&self) -> &Arc<MappedLog> {
        self.inner.cursor.log()
    }

    /// The cursor driving this sequence.
    pub fn cursor(&self) -> &Cursor {
        &self.inner.cursor
    }

    /// Options the sequence was created with.
    pub fn config(&self) -> &SequenceConfig {
        &self.inner.config
    }

    /// Declare a peer. Idempotent across processes.
    pub fn peer_declare(&self, name: &str) -> Result<PeerId> {
        self.cursor().directory_mut().peer_declare(name)
    }

    /// Declare a channel on behalf of `peer`. Idempotent across processes.
    pub fn channel_declare(&self, peer: PeerId, time: i64, name: &str) -> Result<ChannelId> {
        self.cursor().directory_mut().channel_declare(peer, time, name)
    }

    /// Declare the stream `(peer, channel)`.
    pub fn stream_declare(&self, peer: PeerId, channel: ChannelId) -> Result<StreamId> {
        self.cursor().directory_mut().stream_declare(peer, channel)
    }

    /// Declare the stream `(peer, channel)` with a payload encoding.
    pub fn stream_declare_encoded(
        &self,
        peer: PeerId,
        channel: ChannelId,
        encoding: &str,
    ) -> Result<StreamId> {
        self.cursor()
            .directory_mut()
            .stream_declare_encoded(peer, channel, encoding)
    }

    /// Name of a declared peer.
    pub fn peer_name(&self, peer: PeerId) -> Result<String> {
        let mut directory = self.cursor().directory_mut();
        if directory.peer_name(peer).is_err() {
            directory.replay()?;
        }
        directory.peer_name(peer).map(str::to_string)
    }

    /// Name of a declared channel.
    pub fn channel_name(&self, channel: ChannelId) -> Result<String> {
        let mut directory = self.cursor().directory_mut();
        if directory.channel_name(channel).is_err() {
            directory.replay()?;
        }
        directory.channel_name(channel).map(str::to_string)
    }

    /// Reserve `size` payload bytes for a data record.
    pub fn reserve(&self, size: usize) -> Result<DataReservation<'_>> {
        let reservation = self.log().reserve(DATA_HEADER_SIZE + size)?;
        Ok(DataReservation { reservation })
    }

    /// Commit a reservation as data of `(peer, channel)` at `time`.
    ///
    /// The stream is declared first if needed. Returns the record offset.
    pub fn commit(
        &self,
        peer: PeerId,
        channel: ChannelId,
        time: i64,
        reservation: DataReservation<'_>,
    ) -> Result<Offset> {
        let stream = self
            .cursor()
            .directory_mut()
            .declare_stream(peer, channel, None, time)?;
        let mut reservation = reservation.reservation;
        DataMessage::encode_header(&mut reservation, stream, time);
        let it = self.log().commit(reservation, SubStream::Data)?;
        Ok(self.log().tell(it))
    }

    /// Write `bytes` as one data record.
    pub fn write(&self, peer: PeerId, channel: ChannelId, time: i64, bytes: &[u8]) -> Result<Offset> {
        let mut reservation = self.reserve(bytes.len())?;
        reservation.copy_from_slice(bytes);
        self.commit(peer, channel, time, reservation)
    }

    /// Process at most one record.
    pub fn poll(&self) -> Result<bool> {
        self.cursor().poll()
    }

    /// Poll until nothing is pending.
    pub fn drain(&self) -> Result<usize> {
        self.cursor().drain()
    }

    /// Reposition the data cursor.
    pub fn seek(&self, offset: Offset) -> Result<()> {
        self.cursor().seek(offset)
    }

    /// Durable offset of the data cursor.
    pub fn tell(&self) -> Offset {
        self.cursor().tell()
    }

    /// Call `cb` for every data record of `channel`.
    pub fn data_subscribe(&self, channel: ChannelId, cb: DataCallback) -> Result<bool> {
        self.cursor().data_subscribe(channel, cb)
    }

    /// Stop calling `cb` for `channel`.
    pub fn data_unsubscribe(&self, channel: ChannelId, cb: &DataCallback) -> bool {
        self.cursor().data_unsubscribe(channel, cb)
    }

    /// Call `cb` for every channel matching `prefix`, present and future.
    pub fn prefix_subscribe(&self, prefix: &str, cb: DataCallback) -> Result<()> {
        self.cursor().prefix_subscribe(prefix, cb)
    }

    /// Forget a prefix registration.
    pub fn prefix_unsubscribe(&self, prefix: &str, cb: &DataCallback) -> bool {
        self.cursor().prefix_unsubscribe(prefix, cb)
    }

    /// Call `cb` once per newly announced peer.
    pub fn on_peer(&self, cb: PeerCallback) -> bool {
        self.cursor().on_peer(cb)
    }

    /// Call `cb` once per newly announced channel.
    pub fn on_channel(&self, cb: ChannelCallback) -> bool {
        self.cursor().on_channel(cb)
    }

    /// Call `cb` once per newly announced stream.
    pub fn on_stream(&self, cb: StreamCallback) -> bool {
        self.cursor().on_stream(cb)
    }

    /// Call `cb` whenever a poll finds nothing to do.
    pub fn on_idle(&self, cb: IdleCallback) -> bool {
        self.cursor().on_idle(cb)
    }

    /// Remove every user callback.
    pub fn clear_callbacks(&self) {
        self.cursor().clear_callbacks()
    }

    /// Move every callback of `src` onto this sequence.
    pub fn consume(&self, src: &Sequence) -> Result<()> {
        self.cursor().consume(src.cursor())
    }

    /// Mark `stream` as subscribed in the log.
    pub fn subscribe(&self, stream: StreamId) -> Result<bool> {
        self.cursor().directory_mut().subscribe(stream)
    }

    /// Whether any process subscribed to `stream`.
    pub fn is_subscribed(&self, stream: StreamId) -> Result<bool> {
        self.cursor().directory_mut().is_subscribed(stream)
    }

    /// Publish an advisory directory message.
    pub fn directory_publish(&self, payload: &[u8]) -> Result<bool> {
        self.cursor().directory_mut().directory_publish(payload)
    }

    /// Append an index entry pointing at a data record.
    pub fn index_write(&self, stream: StreamId, data_offset: Offset, payload: &[u8]) -> Result<Offset> {
        let entry = IndexEntry {
            stream,
            data_offset,
            payload,
        };
        let mut reservation = self.log().reserve(entry.encoded_len())?;
        entry.encode_into(&mut reservation);
        let it = self.log().commit(reservation, SubStream::Index)?;
        Ok(self.log().tell(it))
    }

    /// Index entries of every stream writing to `channel`, in log order.
    pub fn index_entries(&self, channel: ChannelId) -> Result<Vec<IndexRecord>> {
        let mut directory = self.cursor().directory_mut();
        directory.replay()?;

        let log = self.log();
        let mut entries = Vec::new();
        let mut it = log.begin(SubStream::Index);
        while let Some(record) = log.read(it)? {
            it = record.iter();
            let entry = IndexEntry::decode(record.offset(), record.data())?;
            let matches = directory
                .stream(entry.stream)
                .is_some_and(|info| info.channel == channel);
            if matches {
                entries.push(IndexRecord {
                    offset: record.offset(),
                    stream: entry.stream,
                    data_offset: entry.data_offset,
                    payload: entry.payload.to_vec(),
                });
            }
        }
        Ok(entries)
    }
}

impl std::fmt::Debug for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequence")
            .field("log", self.log())
            .field("cursor", self.cursor())
            .field("handles", &self.strong_count())
            .finish()
    }
}
