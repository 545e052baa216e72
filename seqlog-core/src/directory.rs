//! Peer, channel and stream naming.
//!
//! The directory is the in-memory view of the announcement sub-stream. It
//! is never persisted: every process rebuilds the same maps by replaying
//! announcements from the sentinel, so ids are stable for the lifetime of
//! the file.
//!
//! Declarations use lookup-or-insert. The caller first replays to the
//! tail; if the name is still unknown it writes one announcement with
//! [`MappedLog::commit_after`], which links only if no other announcement
//! was committed since the replay. A lost race replays the newcomers and
//! retries, so a name is written at most once even across processes.

use crate::error::{Result, SeqlogError};
use crate::log::{Iter, Linked, MappedLog, NODE_HEADER_SIZE, Record, SubStream};
use crate::types::{ChannelId, Offset, PeerId, StreamId};
use crate::wire::{Announcement, MAX_NAME_LEN, SUBSCRIBED_FIELD, SubscriptionMessage};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A canonical stream: the first announcement of a (peer, channel) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// Stream id, equal to the offset of its announcement.
    pub id: StreamId,
    /// Declaring peer.
    pub peer: PeerId,
    /// Channel the stream writes to.
    pub channel: ChannelId,
    /// Payload encoding, empty when unspecified.
    pub encoding: Arc<str>,
    /// Sequence number of the announcement record.
    pub seqno: u64,
}

/// What replaying one announcement record established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Announced {
    /// Offset of the announcement record.
    pub offset: Offset,
    /// Sequence number within the announcement sub-stream.
    pub seqno: u64,
    /// Declaration time stored in the record.
    pub time: i64,
    /// The announcing peer.
    pub peer: PeerId,
    /// The record introduced the peer.
    pub new_peer: bool,
    /// Channel of a stream announcement.
    pub channel: Option<ChannelId>,
    /// The record introduced the channel name.
    pub new_channel: bool,
    /// Canonical stream of a stream announcement.
    pub stream: Option<StreamId>,
    /// The record is the canonical announcement of its stream.
    pub new_stream: bool,
}

/// Name tables rebuilt from the announcement sub-stream.
///
/// A directory is driven by a single thread. Separate threads or processes
/// each replay their own directory over the same log.
pub struct Directory {
    log: Arc<MappedLog>,
    replay: Iter,
    peers: Vec<Arc<str>>,
    peer_ids: HashMap<Arc<str>, PeerId>,
    channels: Vec<Arc<str>>,
    channel_ids: HashMap<Arc<str>, ChannelId>,
    stream_ids: HashMap<(PeerId, ChannelId), StreamId>,
    streams: HashMap<StreamId, StreamInfo>,
    announced: HashMap<Offset, Announced>,
    published: HashSet<Vec<u8>>,
}

impl Directory {
    /// Create an empty directory over `log`. Nothing is replayed yet.
    pub fn new(log: Arc<MappedLog>) -> Self {
        let replay = log.begin(SubStream::Announcements);
        Self {
            log,
            replay,
            peers: Vec::new(),
            peer_ids: HashMap::new(),
            channels: Vec::new(),
            channel_ids: HashMap::new(),
            stream_ids: HashMap::new(),
            streams: HashMap::new(),
            announced: HashMap::new(),
            published: HashSet::new(),
        }
    }

    /// The log this directory replays.
    pub fn log(&self) -> &Arc<MappedLog> {
        &self.log
    }

    /// Position after the last replayed announcement.
    pub fn position(&self) -> Iter {
        self.replay
    }

    /// Replay one pending announcement. Returns `false` at the tail.
    pub fn replay_one(&mut self) -> Result<bool> {
        let log = Arc::clone(&self.log);
        match log.read(self.replay)? {
            Some(record) => {
                self.apply(&record);
                self.replay = record.iter();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Replay every pending announcement. Returns how many were applied.
    pub fn replay(&mut self) -> Result<usize> {
        let mut count = 0;
        while self.replay_one()? {
            count += 1;
        }
        Ok(count)
    }

    /// Make sure the announcement at `offset` has been replayed.
    pub fn ensure_replayed(&mut self, offset: Offset) -> Result<()> {
        if !self.announced.contains_key(&offset) {
            self.replay()?;
        }
        Ok(())
    }

    fn apply(&mut self, record: &Record<'_>) {
        let offset = record.offset();
        let ann = match Announcement::decode(offset, record.data()) {
            Ok(ann) => ann,
            Err(e) => {
                tracing::warn!(offset = %offset, error = %e, "skipping malformed announcement");
                return;
            }
        };

        let (peer, new_peer) = self.intern_peer(ann.peer);
        let mut entry = Announced {
            offset,
            seqno: record.seqno(),
            time: ann.time,
            peer,
            new_peer,
            channel: None,
            new_channel: false,
            stream: None,
            new_stream: false,
        };

        if ann.is_peer() {
            if !new_peer {
                tracing::warn!(offset = %offset, peer = ann.peer, "duplicate peer announcement");
            }
        } else {
            let (channel, new_channel) = self.intern_channel(ann.channel);
            let stream = match self.stream_ids.get(&(peer, channel)) {
                Some(existing) => {
                    tracing::warn!(
                        offset = %offset,
                        stream = %existing,
                        "duplicate stream announcement resolves to the original"
                    );
                    *existing
                }
                None => {
                    let id = StreamId::from(offset);
                    self.stream_ids.insert((peer, channel), id);
                    self.streams.insert(
                        id,
                        StreamInfo {
                            id,
                            peer,
                            channel,
                            encoding: Arc::from(ann.encoding),
                            seqno: record.seqno(),
                        },
                    );
                    entry.new_stream = true;
                    id
                }
            };
            entry.channel = Some(channel);
            entry.new_channel = new_channel;
            entry.stream = Some(stream);
        }

        self.announced.insert(offset, entry);
    }

    fn intern_peer(&mut self, name: &str) -> (PeerId, bool) {
        if let Some(id) = self.peer_ids.get(name) {
            return (*id, false);
        }
        let id = PeerId::from_index(self.peers.len());
        let name: Arc<str> = Arc::from(name);
        self.peers.push(Arc::clone(&name));
        self.peer_ids.insert(name, id);
        (id, true)
    }

    fn intern_channel(&mut self, name: &str) -> (ChannelId, bool) {
        if let Some(id) = self.channel_ids.get(name) {
            return (*id, false);
        }
        let id = ChannelId::from_index(self.channels.len());
        let name: Arc<str> = Arc::from(name);
        self.channels.push(Arc::clone(&name));
        self.channel_ids.insert(name, id);
        (id, true)
    }

    /// Declare a peer, returning its id. Idempotent.
    pub fn peer_declare(&mut self, name: &str) -> Result<PeerId> {
        validate_name(name)?;
        let id = self.lookup_or_insert(
            |dir| dir.peer_ids.get(name).copied(),
            Announcement::peer(name),
        )?;
        tracing::debug!(peer = %id, name, "declared peer");
        Ok(id)
    }

    /// Declare a channel on behalf of `peer`, returning its id. Idempotent.
    ///
    /// A new channel is announced by a stream record for `(peer, name)`
    /// without an encoding.
    pub fn channel_declare(&mut self, peer: PeerId, time: i64, name: &str) -> Result<ChannelId> {
        validate_name(name)?;
        self.replay()?;
        let peer_name = Arc::clone(self.peer_entry(peer)?);
        let id = self.lookup_or_insert(
            |dir| dir.channel_ids.get(name).copied(),
            Announcement::stream(&peer_name, name, "", time),
        )?;
        tracing::debug!(channel = %id, name, "declared channel");
        Ok(id)
    }

    /// Declare the stream `(peer, channel)`. Idempotent.
    pub fn stream_declare(&mut self, peer: PeerId, channel: ChannelId) -> Result<StreamId> {
        self.declare_stream(peer, channel, None, 0)
    }

    /// Declare the stream `(peer, channel)` with a payload encoding.
    ///
    /// Fails with `EncodingMismatch` if the stream exists with another
    /// encoding.
    pub fn stream_declare_encoded(
        &mut self,
        peer: PeerId,
        channel: ChannelId,
        encoding: &str,
    ) -> Result<StreamId> {
        self.declare_stream(peer, channel, Some(encoding), 0)
    }

    pub(crate) fn declare_stream(
        &mut self,
        peer: PeerId,
        channel: ChannelId,
        encoding: Option<&str>,
        time: i64,
    ) -> Result<StreamId> {
        if let Some(id) = self.stream_ids.get(&(peer, channel)).copied() {
            return self.check_encoding(id, encoding);
        }

        self.replay()?;
        let peer_name = Arc::clone(self.peer_entry(peer)?);
        let channel_name = Arc::clone(self.channel_entry(channel)?);
        let id = self.lookup_or_insert(
            |dir| dir.stream_ids.get(&(peer, channel)).copied(),
            Announcement::stream(&peer_name, &channel_name, encoding.unwrap_or(""), time),
        )?;
        tracing::debug!(stream = %id, peer = %peer, channel = %channel, "declared stream");
        self.check_encoding(id, encoding)
    }

    fn check_encoding(&self, id: StreamId, requested: Option<&str>) -> Result<StreamId> {
        let (Some(requested), Some(info)) = (requested, self.streams.get(&id)) else {
            return Ok(id);
        };
        if &*info.encoding != requested {
            return Err(SeqlogError::EncodingMismatch {
                channel: self.channel_name(info.channel).unwrap_or_default().to_string(),
                declared: info.encoding.to_string(),
                requested: requested.to_string(),
            });
        }
        Ok(id)
    }

    fn lookup_or_insert<T>(
        &mut self,
        find: impl Fn(&Self) -> Option<T>,
        announcement: Announcement<'_>,
    ) -> Result<T> {
        self.replay()?;
        if let Some(found) = find(self) {
            return Ok(found);
        }
        if self.log.is_readonly() {
            return Err(SeqlogError::ReadOnly {
                operation: "declare",
            });
        }

        let log = Arc::clone(&self.log);
        let mut reservation = log.reserve(announcement.encoded_len())?;
        announcement.encode_into(&mut reservation);
        let offset = reservation.offset();
        loop {
            match log.commit_after(reservation, SubStream::Announcements, self.replay)? {
                Linked::Committed(_) => {
                    self.replay()?;
                    return find(self).ok_or_else(|| SeqlogError::MalformedRecord {
                        kind: "announcement",
                        offset,
                        cause: "committed declaration was not found on replay".to_string(),
                    });
                }
                Linked::Stale(returned) => {
                    reservation = returned;
                    self.replay()?;
                    if let Some(found) = find(self) {
                        tracing::debug!(
                            offset = %offset,
                            "concurrent declaration won, abandoning reservation"
                        );
                        return Ok(found);
                    }
                }
            }
        }
    }

    fn peer_entry(&self, peer: PeerId) -> Result<&Arc<str>> {
        peer.index()
            .and_then(|i| self.peers.get(i))
            .ok_or(SeqlogError::PeerNotFound { peer })
    }

    fn channel_entry(&self, channel: ChannelId) -> Result<&Arc<str>> {
        channel
            .index()
            .and_then(|i| self.channels.get(i))
            .ok_or(SeqlogError::ChannelNotFound { channel })
    }

    /// Name of a declared peer.
    pub fn peer_name(&self, peer: PeerId) -> Result<&str> {
        self.peer_entry(peer).map(|name| &**name)
    }

    /// Name of a declared channel.
    pub fn channel_name(&self, channel: ChannelId) -> Result<&str> {
        self.channel_entry(channel).map(|name| &**name)
    }

    /// Id of a replayed peer name.
    pub fn peer_id(&self, name: &str) -> Option<PeerId> {
        self.peer_ids.get(name).copied()
    }

    /// Id of a replayed channel name.
    pub fn channel_id(&self, name: &str) -> Option<ChannelId> {
        self.channel_ids.get(name).copied()
    }

    /// Replayed stream for `(peer, channel)`.
    pub fn stream_id(&self, peer: PeerId, channel: ChannelId) -> Option<StreamId> {
        self.stream_ids.get(&(peer, channel)).copied()
    }

    /// Details of a replayed stream.
    pub fn stream(&self, id: StreamId) -> Option<&StreamInfo> {
        self.streams.get(&id)
    }

    /// Canonical streams writing to `channel`.
    pub fn streams_of(&self, channel: ChannelId) -> Vec<StreamId> {
        let mut ids: Vec<_> = self
            .streams
            .values()
            .filter(|info| info.channel == channel)
            .map(|info| info.id)
            .collect();
        ids.sort();
        ids
    }

    /// Resolve a stream id, replaying pending announcements if needed.
    pub fn resolve_stream(&mut self, id: StreamId) -> Result<Option<StreamInfo>> {
        if !self.streams.contains_key(&id) {
            self.replay()?;
        }
        Ok(self.streams.get(&id).cloned())
    }

    /// What the announcement at `offset` established, once replayed.
    pub fn announcement(&self, offset: Offset) -> Option<&Announced> {
        self.announced.get(&offset)
    }

    /// Replayed peers in declaration order.
    pub fn peers(&self) -> impl Iterator<Item = (PeerId, &str)> {
        self.peers
            .iter()
            .enumerate()
            .map(|(i, name)| (PeerId::from_index(i), &**name))
    }

    /// Replayed channels in declaration order.
    pub fn channels(&self) -> impl Iterator<Item = (ChannelId, &str)> {
        self.channels
            .iter()
            .enumerate()
            .map(|(i, name)| (ChannelId::from_index(i), &**name))
    }

    /// Replayed canonical streams, in no particular order.
    pub fn streams(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams.values()
    }

    /// Publish an advisory directory message.
    ///
    /// Messages are deduplicated only against payloads this directory has
    /// already published; the log is not consulted. Returns `true` if a
    /// record was written.
    pub fn directory_publish(&mut self, payload: &[u8]) -> Result<bool> {
        if self.published.contains(payload) {
            return Ok(false);
        }
        let message = SubscriptionMessage {
            stream: None,
            payload,
        };
        let mut reservation = self.log.reserve(message.encoded_len())?;
        message.encode_into(&mut reservation);
        self.log.commit(reservation, SubStream::Subscriptions)?;
        self.published.insert(payload.to_vec());
        Ok(true)
    }

    fn marker(stream: StreamId) -> Offset {
        stream.announcement().add(NODE_HEADER_SIZE + SUBSCRIBED_FIELD)
    }

    fn known_stream(&mut self, stream: StreamId) -> Result<()> {
        if self.resolve_stream(stream)?.is_none() {
            return Err(SeqlogError::UnknownStream {
                offset: stream.announcement(),
                stream,
            });
        }
        Ok(())
    }

    /// Mark `stream` as subscribed.
    ///
    /// Writes a subscription record and stores its offset in the stream's
    /// announcement; the first subscriber wins. Returns `true` if this call
    /// set the marker.
    pub fn subscribe(&mut self, stream: StreamId) -> Result<bool> {
        self.known_stream(stream)?;
        let marker = Self::marker(stream);
        if self.log.load_word(marker)? != 0 {
            return Ok(false);
        }

        let message = SubscriptionMessage {
            stream: Some(stream),
            payload: &[],
        };
        let mut reservation = self.log.reserve(message.encoded_len())?;
        message.encode_into(&mut reservation);
        let it = self.log.commit(reservation, SubStream::Subscriptions)?;
        let swapped = self.log.cas_word(marker, 0, self.log.tell(it).as_u64())?;
        if swapped {
            tracing::debug!(stream = %stream, subscription = %it, "marked stream subscribed");
        }
        Ok(swapped)
    }

    /// Whether any process has subscribed to `stream`.
    pub fn is_subscribed(&mut self, stream: StreamId) -> Result<bool> {
        self.known_stream(stream)?;
        Ok(self.log.load_word(Self::marker(stream))? != 0)
    }
}

impl std::fmt::Debug for Directory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directory")
            .field("replay", &self.replay)
            .field("peers", &self.peers.len())
            .field("channels", &self.channels.len())
            .field("streams", &self.streams.len())
            .finish()
    }
}

fn validate_name(name: &str) -> Result<()> {
    let cause = if name.is_empty() {
        "name is empty"
    } else if name.len() > MAX_NAME_LEN {
        "name is longer than 65535 bytes"
    } else {
        return Ok(());
    };
    Err(SeqlogError::InvalidName {
        name: name.chars().take(64).collect(),
        cause: cause.to_string(),
    })
}
