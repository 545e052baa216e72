//! Read positions and callback dispatch.
//!
//! A [`Cursor`] walks the data sub-stream and the announcement sub-stream
//! side by side. Every [`poll`](Cursor::poll) processes at most one record:
//!
//! 1. a pending announcement, firing peer, channel and stream callbacks;
//! 2. otherwise the next data record, once the announcement of its stream
//!    has been processed, dispatched to the callbacks of its channel;
//! 3. otherwise idle callbacks fire and `poll` returns `false`.
//!
//! Data for a stream is therefore never delivered before the stream's
//! announcement callbacks ran.
//!
//! Callbacks may register or remove callbacks, declare names, or seek the
//! cursor while they run. No internal borrow is held during a callback.

mod events;

pub use events::{
    ChannelCallback, DataCallback, DataEvent, IdleCallback, PeerCallback, StreamCallback,
    StreamEvent,
};

use crate::callbacks::LazyList;
use crate::directory::{Announced, Directory, StreamInfo};
use crate::error::{Result, SeqlogError};
use crate::glob::{self, PrefixRouter};
use crate::log::{Iter, MappedLog, SubStream};
use crate::types::{ChannelId, Offset, StreamId};
use crate::wire::DataMessage;
use std::cell::{Cell, Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

/// A live read position over one log, with its own directory replay.
///
/// A cursor is driven by one thread. Readers on other threads open their
/// own cursor over the same log.
pub struct Cursor {
    log: Arc<MappedLog>,
    directory: RefCell<Directory>,
    data: Cell<Iter>,
    announcements: Cell<Iter>,
    announcement_seqno: Cell<u64>,
    mark_subscriptions: Cell<bool>,
    peer_callbacks: LazyList<PeerCallback>,
    channel_callbacks: LazyList<ChannelCallback>,
    stream_callbacks: LazyList<StreamCallback>,
    idle_callbacks: LazyList<IdleCallback>,
    data_callbacks: RefCell<HashMap<ChannelId, Rc<LazyList<DataCallback>>>>,
    router: PrefixRouter,
}

impl Cursor {
    /// Cursor positioned before the first data record.
    pub fn new(log: Arc<MappedLog>) -> Self {
        let data = log.begin(SubStream::Data);
        Self::with_position(log, data)
    }

    /// Cursor positioned at an offset obtained from [`tell`](Self::tell).
    pub fn at(log: Arc<MappedLog>, offset: Offset) -> Result<Self> {
        let cursor = Self::new(log);
        cursor.seek(offset)?;
        Ok(cursor)
    }

    /// Cursor positioned after the current last data record.
    pub fn at_end(log: Arc<MappedLog>) -> Result<Self> {
        let end = log.end(SubStream::Data)?;
        let cursor = Self::with_position(log, end);
        cursor.directory.borrow_mut().replay()?;
        Ok(cursor)
    }

    fn with_position(log: Arc<MappedLog>, data: Iter) -> Self {
        let announcements = log.begin(SubStream::Announcements);
        Self {
            directory: RefCell::new(Directory::new(Arc::clone(&log))),
            log,
            data: Cell::new(data),
            announcements: Cell::new(announcements),
            announcement_seqno: Cell::new(0),
            mark_subscriptions: Cell::new(false),
            peer_callbacks: LazyList::new(),
            channel_callbacks: LazyList::new(),
            stream_callbacks: LazyList::new(),
            idle_callbacks: LazyList::new(),
            data_callbacks: RefCell::new(HashMap::new()),
            router: PrefixRouter::new(),
        }
    }

    /// The log being read.
    pub fn log(&self) -> &Arc<MappedLog> {
        &self.log
    }

    /// Shared access to the directory.
    ///
    /// Do not hold the guard across a call back into the cursor.
    pub fn directory(&self) -> Ref<'_, Directory> {
        self.directory.borrow()
    }

    /// Exclusive access to the directory, e.g. to declare names.
    pub fn directory_mut(&self) -> RefMut<'_, Directory> {
        self.directory.borrow_mut()
    }

    /// Mark streams as subscribed in the log when data callbacks are
    /// attached to their channel. Ignored on read-only logs.
    pub fn set_mark_subscriptions(&self, enabled: bool) {
        self.mark_subscriptions.set(enabled && !self.log.is_readonly());
    }

    /// Durable offset of the data position.
    pub fn tell(&self) -> Offset {
        self.log.tell(self.data.get())
    }

    /// Offset of the announcement position.
    pub fn tell_announcements(&self) -> Offset {
        self.log.tell(self.announcements.get())
    }

    /// Reposition the data cursor.
    ///
    /// The directory is replayed up to the current announcement tail before
    /// the call returns, so every stream referenced before `offset` resolves.
    /// Fails with `InvalidOffset` unless `offset` is the data root or a
    /// record of the data sub-stream.
    pub fn seek(&self, offset: Offset) -> Result<()> {
        let it = self.log.seek_in(SubStream::Data, offset)?;
        self.directory.borrow_mut().replay()?;
        self.data.set(it);
        tracing::debug!(offset = %offset, "cursor seek");
        Ok(())
    }

    /// Process at most one record. Returns `false` when nothing was pending.
    pub fn poll(&self) -> Result<bool> {
        if self.poll_announcement()? {
            return Ok(true);
        }
        if self.poll_data()? {
            return Ok(true);
        }
        self.idle_callbacks.for_each(|cb| cb());
        Ok(false)
    }

    /// Poll until nothing is pending. Returns the number of records processed.
    pub fn drain(&self) -> Result<usize> {
        let mut count = 0;
        while self.poll()? {
            count += 1;
        }
        Ok(count)
    }

    fn poll_announcement(&self) -> Result<bool> {
        let log = Arc::clone(&self.log);
        let Some(record) = log.read(self.announcements.get())? else {
            return Ok(false);
        };
        let offset = record.offset();
        self.announcements.set(record.iter());
        self.announcement_seqno.set(record.seqno());

        let entry = {
            let mut directory = self.directory.borrow_mut();
            directory.ensure_replayed(offset)?;
            directory.announcement(offset).copied()
        };
        match entry {
            Some(entry) => self.announce(&entry)?,
            None => tracing::warn!(offset = %offset, "announcement was not replayed"),
        }
        Ok(true)
    }

    fn announce(&self, entry: &Announced) -> Result<()> {
        let (peer_name, channel_name, stream) = {
            let directory = self.directory.borrow();
            let peer_name = directory.peer_name(entry.peer)?.to_string();
            let channel_name = match entry.channel {
                Some(channel) => Some(directory.channel_name(channel)?.to_string()),
                None => None,
            };
            let stream = entry
                .stream
                .filter(|_| entry.new_stream)
                .and_then(|id| directory.stream(id).cloned());
            (peer_name, channel_name, stream)
        };

        if entry.new_peer {
            self.peer_callbacks.for_each(|cb| cb(entry.peer, peer_name.as_str()));
        }
        if let (Some(channel), Some(name), true) = (entry.channel, &channel_name, entry.new_channel)
        {
            self.attach_prefixes(channel, name);
            self.channel_callbacks.for_each(|cb| cb(channel, name.as_str()));
        }
        if let Some(info) = stream {
            let event = StreamEvent {
                stream: info.id,
                peer: info.peer,
                channel: info.channel,
                time: entry.time,
                encoding: &*info.encoding,
            };
            self.stream_callbacks.for_each(|cb| cb(&event));
            self.mark_subscribed(&info);
        }
        Ok(())
    }

    /// The internal channel hook: attach prefix registrations to a newly
    /// announced channel. Not affected by `clear_callbacks`.
    fn attach_prefixes(&self, channel: ChannelId, name: &str) {
        let callbacks = self.router.callbacks_for(name);
        if callbacks.is_empty() {
            return;
        }
        let list = self.channel_list(channel);
        for cb in callbacks {
            list.push_unique(cb);
        }
    }

    fn mark_subscribed(&self, info: &StreamInfo) {
        if !self.mark_subscriptions.get() {
            return;
        }
        let attached = self
            .data_callbacks
            .borrow()
            .get(&info.channel)
            .is_some_and(|list| !list.is_empty());
        if attached {
            self.mark_stream(info.id);
        }
    }

    /// Set the advisory subscription marker of `stream`. Failures are
    /// logged and otherwise ignored.
    fn mark_stream(&self, stream: StreamId) {
        if let Err(e) = self.directory.borrow_mut().subscribe(stream) {
            tracing::warn!(stream = %stream, error = %e, "failed to mark stream subscribed");
        }
    }

    fn poll_data(&self) -> Result<bool> {
        let log = Arc::clone(&self.log);
        let Some(record) = log.read(self.data.get())? else {
            return Ok(false);
        };
        let message = match DataMessage::decode(record.offset(), record.data()) {
            Ok(message) => message,
            Err(e) => {
                self.data.set(record.iter());
                return Err(e);
            }
        };

        let info = self.directory.borrow_mut().resolve_stream(message.stream)?;
        let Some(info) = info else {
            self.data.set(record.iter());
            return Err(SeqlogError::UnknownStream {
                offset: record.offset(),
                stream: message.stream,
            });
        };
        if info.seqno > self.announcement_seqno.get() {
            // The stream's announcement goes first.
            return self.poll_announcement();
        }

        self.data.set(record.iter());
        let list = self.data_callbacks.borrow().get(&info.channel).cloned();
        if let Some(list) = list {
            let event = DataEvent {
                peer: info.peer,
                channel: info.channel,
                stream: info.id,
                time: message.time,
                data: message.payload,
                offset: record.offset(),
                seqno: record.seqno(),
            };
            list.for_each(|cb| cb(&event));
        }
        Ok(true)
    }

    fn channel_list(&self, channel: ChannelId) -> Rc<LazyList<DataCallback>> {
        Rc::clone(
            self.data_callbacks
                .borrow_mut()
                .entry(channel)
                .or_default(),
        )
    }

    /// Call `cb` for every data record of `channel`.
    ///
    /// Returns `false` if `cb` was already attached. Marking the channel's
    /// streams as subscribed is best effort and never fails the call.
    pub fn data_subscribe(&self, channel: ChannelId, cb: DataCallback) -> Result<bool> {
        let added = self.channel_list(channel).push_unique(cb);
        if added && self.mark_subscriptions.get() {
            let streams = self.directory.borrow().streams_of(channel);
            for stream in streams {
                self.mark_stream(stream);
            }
        }
        Ok(added)
    }

    /// Stop calling `cb` for `channel`. Takes effect from the next dispatch.
    pub fn data_unsubscribe(&self, channel: ChannelId, cb: &DataCallback) -> bool {
        let list = self.data_callbacks.borrow().get(&channel).cloned();
        list.is_some_and(|list| list.remove(cb))
    }

    /// Call `cb` for every channel matching `prefix`, present and future.
    ///
    /// `"/"` matches every channel, a prefix ending in `/` matches every
    /// channel name starting with it, anything else matches one name.
    pub fn prefix_subscribe(&self, prefix: &str, cb: DataCallback) -> Result<()> {
        self.router.register(prefix, Rc::clone(&cb));
        let channels: Vec<ChannelId> = self
            .directory
            .borrow()
            .channels()
            .filter(|(_, name)| glob::matches(prefix, name))
            .map(|(id, _)| id)
            .collect();
        for channel in channels {
            self.data_subscribe(channel, Rc::clone(&cb))?;
        }
        Ok(())
    }

    /// Forget a prefix registration and detach `cb` from the channels it
    /// matched, unless another registration still covers them.
    pub fn prefix_unsubscribe(&self, prefix: &str, cb: &DataCallback) -> bool {
        if !self.router.unregister(prefix, cb) {
            return false;
        }
        let channels: Vec<(ChannelId, String)> = self
            .directory
            .borrow()
            .channels()
            .filter(|(_, name)| glob::matches(prefix, name))
            .map(|(id, name)| (id, name.to_string()))
            .collect();
        for (channel, name) in channels {
            if !self.router.covers(&name, cb) {
                self.data_unsubscribe(channel, cb);
            }
        }
        true
    }

    /// Call `cb` once for every newly announced peer.
    pub fn on_peer(&self, cb: PeerCallback) -> bool {
        self.peer_callbacks.push_unique(cb)
    }

    /// Remove a peer callback.
    pub fn remove_peer_callback(&self, cb: &PeerCallback) -> bool {
        self.peer_callbacks.remove(cb)
    }

    /// Call `cb` once for every newly announced channel name.
    pub fn on_channel(&self, cb: ChannelCallback) -> bool {
        self.channel_callbacks.push_unique(cb)
    }

    /// Remove a channel callback.
    pub fn remove_channel_callback(&self, cb: &ChannelCallback) -> bool {
        self.channel_callbacks.remove(cb)
    }

    /// Call `cb` once for every newly announced stream.
    pub fn on_stream(&self, cb: StreamCallback) -> bool {
        self.stream_callbacks.push_unique(cb)
    }

    /// Remove a stream callback.
    pub fn remove_stream_callback(&self, cb: &StreamCallback) -> bool {
        self.stream_callbacks.remove(cb)
    }

    /// Call `cb` whenever a poll finds nothing to do.
    pub fn on_idle(&self, cb: IdleCallback) -> bool {
        self.idle_callbacks.push_unique(cb)
    }

    /// Remove an idle callback.
    pub fn remove_idle_callback(&self, cb: &IdleCallback) -> bool {
        self.idle_callbacks.remove(cb)
    }

    /// Remove every user callback and prefix registration.
    ///
    /// Channels announced later still go through the prefix hook, so new
    /// prefix registrations keep working.
    pub fn clear_callbacks(&self) {
        self.peer_callbacks.clear();
        self.channel_callbacks.clear();
        self.stream_callbacks.clear();
        self.idle_callbacks.clear();
        let lists: Vec<_> = self.data_callbacks.borrow().values().cloned().collect();
        for list in lists {
            list.clear();
        }
        self.router.clear();
    }

    /// Move every callback registered on `src` to `self`.
    ///
    /// Both cursors must stand at the same data and announcement positions,
    /// so no record is delivered twice or skipped by the hand-off.
    pub fn consume(&self, src: &Cursor) -> Result<()> {
        if self.tell() != src.tell() || self.tell_announcements() != src.tell_announcements() {
            return Err(SeqlogError::CursorMismatch {
                dest_data: self.tell(),
                dest_announcements: self.tell_announcements(),
                src_data: src.tell(),
                src_announcements: src.tell_announcements(),
            });
        }

        for cb in src.peer_callbacks.snapshot() {
            self.peer_callbacks.push_unique(cb);
        }
        for cb in src.channel_callbacks.snapshot() {
            self.channel_callbacks.push_unique(cb);
        }
        for cb in src.stream_callbacks.snapshot() {
            self.stream_callbacks.push_unique(cb);
        }
        for cb in src.idle_callbacks.snapshot() {
            self.idle_callbacks.push_unique(cb);
        }
        let lists: Vec<_> = src
            .data_callbacks
            .borrow()
            .iter()
            .map(|(channel, list)| (*channel, list.snapshot()))
            .collect();
        for (channel, callbacks) in lists {
            let list = self.channel_list(channel);
            for cb in callbacks {
                list.push_unique(cb);
            }
        }
        for (prefix, callbacks) in src.router.entries() {
            for cb in callbacks {
                self.router.register(&prefix, cb);
            }
        }

        src.clear_callbacks();
        tracing::debug!(position = %self.tell(), "cursor callbacks handed off");
        Ok(())
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("data", &self.data.get())
            .field("announcements", &self.announcements.get())
            .field("prefixes", &self.router)
            .finish()
    }
}
