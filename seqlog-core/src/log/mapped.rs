//! The append-only mapped log.

use super::header::{
    CLOSABLE_NO, CLOSABLE_OFFSET, CLOSABLE_YES, HEADER_SIZE, LOG_MAGIC, LogHeader, MAGIC_OFFSET,
    MAX_PAYLOAD_SIZE, NODE_HEADER_SIZE, NODE_NEXT_FIELD, NODE_PREV_FIELD, NODE_SEQNO_FIELD,
    NODE_SIZE_FIELD, NODE_SIZE_MASK, PAGE_SIZE, RESERVED_OFFSET, SubStream, word_ceil,
};
use super::region::Region;
use crate::config::LogConfig;
use crate::error::{Result, SeqlogError};
use crate::types::Offset;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

// Shared words are stored little-endian regardless of the host.
#[inline]
fn load(word: &AtomicU64) -> u64 {
    u64::from_le(word.load(Ordering::Acquire))
}

#[inline]
fn store(word: &AtomicU64, value: u64) {
    word.store(value.to_le(), Ordering::Release);
}

#[inline]
fn cas(word: &AtomicU64, current: u64, new: u64) -> std::result::Result<u64, u64> {
    word.compare_exchange(
        current.to_le(),
        new.to_le(),
        Ordering::AcqRel,
        Ordering::Acquire,
    )
    .map(u64::from_le)
    .map_err(u64::from_le)
}

/// A position in a sub-stream: the next-link field of one record.
///
/// The position of a sentinel is "before the first record"; the position
/// of a record is "after that record". Positions are plain offsets, so
/// [`MappedLog::tell`] and [`MappedLog::seek`] convert them losslessly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Iter(Offset);

impl Iter {
    /// Offset of the record (or sentinel) holding the link.
    #[must_use]
    pub const fn offset(&self) -> Offset {
        self.0
    }

    /// Whether this is a sub-stream root.
    #[must_use]
    pub const fn is_root(&self) -> bool {
        self.0.as_u64() < HEADER_SIZE
    }
}

impl fmt::Display for Iter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A committed record.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    offset: Offset,
    seqno: u64,
    data: &'a [u8],
}

impl<'a> Record<'a> {
    /// Offset of the record.
    #[must_use]
    pub fn offset(&self) -> Offset {
        self.offset
    }

    /// Sequence number within its sub-stream (the first record is 1).
    #[must_use]
    pub fn seqno(&self) -> u64 {
        self.seqno
    }

    /// Payload bytes.
    #[must_use]
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Position right after this record.
    #[must_use]
    pub fn iter(&self) -> Iter {
        Iter(self.offset)
    }
}

/// Payload space obtained from [`MappedLog::reserve`].
///
/// The record is floating until committed: it belongs to no sub-stream and
/// no reader can observe it. Dropping a reservation abandons the space.
pub struct Reservation<'a> {
    offset: Offset,
    data: &'a mut [u8],
}

impl<'a> Reservation<'a> {
    /// Offset of the reserved record.
    #[must_use]
    pub fn offset(&self) -> Offset {
        self.offset
    }
}

impl Deref for Reservation<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl DerefMut for Reservation<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data
    }
}

impl fmt::Debug for Reservation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reservation")
            .field("offset", &self.offset)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Where a next-link leads.
enum Step {
    /// Unset: the holder is the tail.
    End,
    /// The holder is the closed tail.
    Closed,
    /// The following record.
    Forward(u64),
    /// Back-link left by a removed tail.
    Back(u64),
}

/// Outcome of [`MappedLog::commit_after`].
#[derive(Debug)]
pub enum Linked<'a> {
    /// The record is now the tail.
    Committed(Iter),
    /// The expected tail was not the tail any more; nothing was linked.
    Stale(Reservation<'a>),
}

/// A memory-mapped, append-only log shared between threads and processes.
///
/// Appending is lock-free: reservation advances a shared counter with
/// compare-and-swap and commit links the record with a single
/// compare-and-swap on the tail's next-link. The log is `Send + Sync`;
/// share it with `Arc`.
pub struct MappedLog {
    region: Region,
    closable: bool,
}

impl MappedLog {
    /// Open (or create) the log at `path`.
    ///
    /// A writable open initializes an empty file. Any open validates the
    /// magic marker and the closable mode; a mismatch is fatal.
    pub fn open(path: impl AsRef<Path>, config: &LogConfig) -> Result<Self> {
        let region = Region::open(path.as_ref(), !config.readonly)?;
        let log = Self {
            region,
            closable: config.closable,
        };
        log.init()?;

        tracing::info!(
            path = %log.path().display(),
            readonly = config.readonly,
            closable = config.closable,
            "opened log"
        );
        Ok(log)
    }

    fn init(&self) -> Result<()> {
        let magic = u64::from_le_bytes(LOG_MAGIC);
        let closable = if self.closable {
            CLOSABLE_YES
        } else {
            CLOSABLE_NO
        };

        if !self.region.is_writable() {
            let header = self.header()?;
            header
                .validate()
                .map_err(|cause| SeqlogError::InvalidFormat {
                    path: self.path().to_path_buf(),
                    cause,
                })?;
            return self.check_closable(header.closable, closable);
        }

        // Racing initializers write identical values, so each word is set
        // at most once and a non-zero mismatch means a foreign file.
        let word = self.word(MAGIC_OFFSET)?;
        if let Err(found) = cas(word, 0, magic) {
            if found != magic {
                return Err(SeqlogError::InvalidFormat {
                    path: self.path().to_path_buf(),
                    cause: format!(
                        "unexpected magic {:?}",
                        String::from_utf8_lossy(&found.to_le_bytes())
                    ),
                });
            }
        }

        if let Err(found) = cas(self.word(CLOSABLE_OFFSET)?, 0, closable) {
            self.check_closable(found, closable)?;
        }
        let _ = cas(self.word(RESERVED_OFFSET)?, 0, HEADER_SIZE);
        for sub in SubStream::ALL {
            let sentinel = sub.sentinel().as_u64();
            let _ = cas(self.word(sentinel + NODE_PREV_FIELD)?, 0, sentinel);
        }
        Ok(())
    }

    fn check_closable(&self, found: u64, configured: u64) -> Result<()> {
        if found != configured {
            return Err(SeqlogError::ClosableMismatch {
                path: self.path().to_path_buf(),
                configured: configured == CLOSABLE_YES,
                found: found == CLOSABLE_YES,
            });
        }
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        self.region.path()
    }

    /// Whether mutating calls are rejected.
    pub fn is_readonly(&self) -> bool {
        !self.region.is_writable()
    }

    /// Whether sub-streams can be closed.
    pub fn is_closable(&self) -> bool {
        self.closable
    }

    fn word(&self, offset: u64) -> Result<&AtomicU64> {
        self.region.word(offset)
    }

    /// Load a shared word written after commit (e.g. a subscription marker).
    pub(crate) fn load_word(&self, offset: Offset) -> Result<u64> {
        Ok(load(self.region.word(offset.as_u64())?))
    }

    /// Compare-and-swap a shared word. Returns `true` if it was swapped.
    pub(crate) fn cas_word(&self, offset: Offset, current: u64, new: u64) -> Result<bool> {
        self.writable("update")?;
        Ok(cas(self.region.word(offset.as_u64())?, current, new).is_ok())
    }

    fn link(&self, holder: u64) -> Result<&AtomicU64> {
        self.word(holder + NODE_NEXT_FIELD)
    }

    fn seqno_of(&self, node: u64) -> Result<u64> {
        if node < HEADER_SIZE {
            return Ok(0);
        }
        Ok(load(self.word(node + NODE_SEQNO_FIELD)?))
    }

    fn writable(&self, operation: &'static str) -> Result<()> {
        if self.is_readonly() {
            return Err(SeqlogError::ReadOnly { operation });
        }
        Ok(())
    }

    /// High-water mark of reserved bytes.
    pub fn size(&self) -> Result<u64> {
        Ok(load(self.word(RESERVED_OFFSET)?))
    }

    /// Snapshot of the file header.
    pub fn header(&self) -> Result<LogHeader> {
        let bytes = self.region.bytes(0, HEADER_SIZE)?;
        LogHeader::from_bytes(bytes).map_err(|e| SeqlogError::InvalidFormat {
            path: self.path().to_path_buf(),
            cause: e.to_string(),
        })
    }

    /// Reserve a floating record with `size` payload bytes.
    ///
    /// The payload is zeroed. The record joins a sub-stream only when it is
    /// passed to [`commit`](Self::commit).
    pub fn reserve(&self, size: usize) -> Result<Reservation<'_>> {
        self.writable("reserve")?;
        if size == 0 {
            return Err(SeqlogError::EmptyReservation);
        }
        let size = size as u64;
        if size > MAX_PAYLOAD_SIZE {
            return Err(SeqlogError::ReservationTooLarge {
                requested: size,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let total = word_ceil(NODE_HEADER_SIZE + size);
        let counter = self.word(RESERVED_OFFSET)?;
        let mut current = load(counter);
        let start = loop {
            let start = if current % PAGE_SIZE + total > PAGE_SIZE {
                (current / PAGE_SIZE + 1) * PAGE_SIZE
            } else {
                current
            };
            match cas(counter, current, start + total) {
                Ok(_) => break start,
                Err(actual) => current = actual,
            }
        };

        store(self.word(start + NODE_SIZE_FIELD)?, size);
        store(self.word(start + NODE_NEXT_FIELD)?, 0);
        // A floating record points at itself until it is linked.
        store(self.word(start + NODE_PREV_FIELD)?, start);
        store(self.word(start + NODE_SEQNO_FIELD)?, 0);

        // SAFETY: the range was just carved out of the counter by this call.
        let data = unsafe { self.region.bytes_mut(start + NODE_HEADER_SIZE, size)? };
        data.fill(0);

        Ok(Reservation {
            offset: Offset::new(start),
            data,
        })
    }

    /// Link a reservation at the tail of `sub`.
    ///
    /// Retries until the link succeeds. Fails with `Closed` if the
    /// sub-stream was closed.
    pub fn commit(&self, reservation: Reservation<'_>, sub: SubStream) -> Result<Iter> {
        self.writable("commit")?;
        let node = reservation.offset.as_u64();
        let sentinel = sub.sentinel().as_u64();
        loop {
            let hint = load(self.word(sentinel + NODE_PREV_FIELD)?);
            let tail = self.walk_to_tail(sub, hint)?;
            if self.try_link(node, tail, sub)? {
                return Ok(Iter(reservation.offset));
            }
        }
    }

    /// Link a reservation only if `expected` is still the tail of `sub`.
    ///
    /// On a lost race the reservation is handed back untouched so the
    /// caller can inspect the new records and decide whether to retry.
    pub fn commit_after<'a>(
        &'a self,
        reservation: Reservation<'a>,
        sub: SubStream,
        expected: Iter,
    ) -> Result<Linked<'a>> {
        self.writable("commit")?;
        let mut tail = expected.0.as_u64();
        loop {
            match self.step(tail)? {
                Step::End => break,
                Step::Closed => return Err(SeqlogError::Closed { sub_stream: sub }),
                Step::Back(prev) => tail = prev,
                Step::Forward(_) => return Ok(Linked::Stale(reservation)),
            }
        }

        if self.try_link(reservation.offset.as_u64(), tail, sub)? {
            Ok(Linked::Committed(Iter(reservation.offset)))
        } else {
            Ok(Linked::Stale(reservation))
        }
    }

    /// Append a copy of `bytes` to `sub`.
    pub fn append(&self, sub: SubStream, bytes: &[u8]) -> Result<Iter> {
        let mut reservation = self.reserve(bytes.len())?;
        reservation.copy_from_slice(bytes);
        self.commit(reservation, sub)
    }

    fn try_link(&self, node: u64, tail: u64, sub: SubStream) -> Result<bool> {
        let sentinel = sub.sentinel().as_u64();
        let size = self.word(node + NODE_SIZE_FIELD)?;
        store(size, (load(size) & NODE_SIZE_MASK) | sub.tag());
        store(self.word(node + NODE_PREV_FIELD)?, tail);
        store(self.word(node + NODE_SEQNO_FIELD)?, self.seqno_of(tail)? + 1);
        if cas(self.link(tail)?, 0, node).is_err() {
            return Ok(false);
        }
        store(self.word(sentinel + NODE_PREV_FIELD)?, node);
        Ok(true)
    }

    /// Follow links from `start` to the record whose next-link is unset.
    fn walk_to_tail(&self, sub: SubStream, start: u64) -> Result<u64> {
        let mut last = start;
        loop {
            match self.step(last)? {
                Step::End => return Ok(last),
                Step::Closed => return Err(SeqlogError::Closed { sub_stream: sub }),
                Step::Forward(next) | Step::Back(next) => last = next,
            }
        }
    }

    /// Classify the next-link of `holder`.
    ///
    /// A removed tail keeps a link back to its predecessor, recognised by a
    /// sequence number that does not increase. A link to a sentinel is
    /// either such a back-link or the closed mark; only a record that is
    /// still linked (or the sentinel itself) can carry the closed mark.
    fn step(&self, holder: u64) -> Result<Step> {
        let next = load(self.link(holder)?);
        if next == 0 {
            return Ok(Step::End);
        }
        if next < HEADER_SIZE {
            if holder < HEADER_SIZE {
                return Ok(Step::Closed);
            }
            let prev = load(self.word(holder + NODE_PREV_FIELD)?);
            if load(self.link(prev)?) == holder {
                return Ok(Step::Closed);
            }
            return Ok(Step::Back(next));
        }
        if holder >= HEADER_SIZE && self.seqno_of(next)? <= self.seqno_of(holder)? {
            return Ok(Step::Back(next));
        }
        Ok(Step::Forward(next))
    }

    /// Offset of the record following `it`, if any.
    fn successor(&self, it: Iter) -> Result<Option<u64>> {
        let mut holder = it.0.as_u64();
        loop {
            match self.step(holder)? {
                Step::End | Step::Closed => return Ok(None),
                Step::Back(prev) => holder = prev,
                Step::Forward(next) => return Ok(Some(next)),
            }
        }
    }

    fn record_at(&self, node: u64) -> Result<Record<'_>> {
        let size = load(self.word(node + NODE_SIZE_FIELD)?) & NODE_SIZE_MASK;
        let seqno = load(self.word(node + NODE_SEQNO_FIELD)?);
        let data = self.region.bytes(node + NODE_HEADER_SIZE, size)?;
        Ok(Record {
            offset: Offset::new(node),
            seqno,
            data,
        })
    }

    /// Root position of `sub`, before its first record.
    #[must_use]
    pub fn begin(&self, sub: SubStream) -> Iter {
        Iter(sub.sentinel())
    }

    /// Position after the current tail of `sub`.
    pub fn end(&self, sub: SubStream) -> Result<Iter> {
        let sentinel = sub.sentinel().as_u64();
        let mut last = load(self.word(sentinel + NODE_PREV_FIELD)?);
        loop {
            match self.step(last)? {
                Step::End | Step::Closed => return Ok(Iter(Offset::new(last))),
                Step::Forward(next) | Step::Back(next) => last = next,
            }
        }
    }

    /// The record following `it`, or `None` at the end of the sub-stream.
    pub fn read(&self, it: Iter) -> Result<Option<Record<'_>>> {
        match self.successor(it)? {
            Some(node) => self.record_at(node).map(Some),
            None => Ok(None),
        }
    }

    /// Whether no record follows `it`.
    pub fn is_terminal(&self, it: Iter) -> Result<bool> {
        Ok(self.successor(it)?.is_none())
    }

    /// Position after the record following `it`. Stays put at the end.
    pub fn next(&self, it: Iter) -> Result<Iter> {
        Ok(self
            .successor(it)?
            .map(|node| Iter(Offset::new(node)))
            .unwrap_or(it))
    }

    /// Position before the record `it` stands after. Stays put at a root.
    pub fn prev(&self, it: Iter) -> Result<Iter> {
        if it.is_root() {
            return Ok(it);
        }
        Ok(Iter(Offset::new(load(
            self.word(it.0.as_u64() + NODE_PREV_FIELD)?,
        ))))
    }

    /// Durable offset of a position.
    #[must_use]
    pub fn tell(&self, it: Iter) -> Offset {
        it.0
    }

    /// Position for an offset obtained from [`tell`](Self::tell).
    ///
    /// Fails if the offset names neither a sentinel nor a linked record.
    pub fn seek(&self, offset: Offset) -> Result<Iter> {
        if SubStream::from_sentinel(offset).is_some() {
            return Ok(Iter(offset));
        }
        self.validate_record(offset)?;
        Ok(Iter(offset))
    }

    /// Like [`seek`](Self::seek), but also fails unless `offset` is the
    /// root of `sub` or a record linked into `sub`.
    pub fn seek_in(&self, sub: SubStream, offset: Offset) -> Result<Iter> {
        if let Some(root) = SubStream::from_sentinel(offset) {
            if root != sub {
                return Err(SeqlogError::InvalidOffset {
                    offset,
                    cause: format!("root of the {} sub-stream, not {}", root, sub),
                });
            }
            return Ok(Iter(offset));
        }
        self.validate_record(offset)?;
        match self.sub_stream_at(offset.as_u64())? {
            Some(found) if found == sub => Ok(Iter(offset)),
            Some(found) => Err(SeqlogError::InvalidOffset {
                offset,
                cause: format!("record of the {} sub-stream, not {}", found, sub),
            }),
            None => Err(SeqlogError::InvalidOffset {
                offset,
                cause: "record carries no sub-stream tag".to_string(),
            }),
        }
    }

    /// Sub-stream a linked record belongs to.
    pub fn sub_stream_of(&self, offset: Offset) -> Result<SubStream> {
        if let Some(root) = SubStream::from_sentinel(offset) {
            return Ok(root);
        }
        self.validate_record(offset)?;
        self.sub_stream_at(offset.as_u64())?
            .ok_or_else(|| SeqlogError::InvalidOffset {
                offset,
                cause: "record carries no sub-stream tag".to_string(),
            })
    }

    fn sub_stream_at(&self, node: u64) -> Result<Option<SubStream>> {
        Ok(SubStream::from_size_word(load(
            self.word(node + NODE_SIZE_FIELD)?,
        )))
    }

    fn validate_record(&self, offset: Offset) -> Result<()> {
        let node = offset.as_u64();
        let invalid = |cause: &str| SeqlogError::InvalidOffset {
            offset,
            cause: cause.to_string(),
        };
        if node < HEADER_SIZE {
            return Err(invalid("inside the file header"));
        }
        if node % 8 != 0 {
            return Err(invalid("not word aligned"));
        }
        if node + NODE_HEADER_SIZE > self.size()? {
            return Err(invalid("beyond the reserved region"));
        }
        let size = load(self.word(node + NODE_SIZE_FIELD)?) & NODE_SIZE_MASK;
        if size == 0 || node % PAGE_SIZE + word_ceil(NODE_HEADER_SIZE + size) > PAGE_SIZE {
            return Err(invalid("no record starts here"));
        }
        let prev = load(self.word(node + NODE_PREV_FIELD)?);
        if prev == node {
            return Err(invalid("record was reserved but never committed"));
        }
        if load(self.link(prev)?) != node {
            return Err(SeqlogError::AlreadyRemoved { offset });
        }
        Ok(())
    }

    /// Unlink the record `it` stands after.
    ///
    /// Returns the position before the removed record. Storage is not
    /// reclaimed.
    pub fn remove(&self, it: Iter) -> Result<Iter> {
        self.writable("remove")?;
        let offset = it.0;
        if it.is_root() {
            return Err(SeqlogError::InvalidOffset {
                offset,
                cause: "a sub-stream root cannot be removed".to_string(),
            });
        }
        self.validate_record(offset)?;

        let node = offset.as_u64();
        let prev = load(self.word(node + NODE_PREV_FIELD)?);
        let next = load(self.link(node)?);
        if cas(self.link(prev)?, node, next).is_err() {
            return Err(SeqlogError::AlreadyRemoved { offset });
        }

        if next == 0 || next < HEADER_SIZE {
            // The removed record was the tail: leave a back-link so that
            // committers and readers standing on it rejoin the list.
            match cas(self.link(node)?, next, prev) {
                Ok(_) => {}
                Err(appended) => {
                    store(self.word(appended + NODE_PREV_FIELD)?, prev);
                    let _ = cas(self.link(prev)?, next, appended);
                }
            }
            for sub in SubStream::ALL {
                let hint = self.word(sub.sentinel().as_u64() + NODE_PREV_FIELD)?;
                let _ = cas(hint, node, prev);
            }
        } else {
            store(self.word(next + NODE_PREV_FIELD)?, prev);
        }

        tracing::debug!(offset = %offset, "removed record");
        Ok(Iter(Offset::new(prev)))
    }

    /// Mark `sub` closed. Later commits fail with `Closed`.
    pub fn close(&self, sub: SubStream) -> Result<()> {
        self.writable("close")?;
        if !self.closable {
            return Err(SeqlogError::NotClosable { sub_stream: sub });
        }
        let sentinel = sub.sentinel().as_u64();
        loop {
            let hint = load(self.word(sentinel + NODE_PREV_FIELD)?);
            let tail = match self.walk_to_tail(sub, hint) {
                Ok(tail) => tail,
                Err(SeqlogError::Closed { .. }) => return Ok(()),
                Err(e) => return Err(e),
            };
            if cas(self.link(tail)?, 0, sentinel).is_ok() {
                tracing::info!(path = %self.path().display(), sub_stream = %sub, "closed sub-stream");
                return Ok(());
            }
        }
    }

    /// Whether `sub` has been closed.
    pub fn is_closed(&self, sub: SubStream) -> Result<bool> {
        let tail = self.end(sub)?;
        Ok(matches!(self.step(tail.0.as_u64())?, Step::Closed))
    }

    /// Map pages ahead of the write frontier and start write-back of the
    /// pages written since the last call.
    pub fn maintain(&self, preallocate: u64) -> Result<()> {
        if self.is_readonly() {
            return Ok(());
        }
        let frontier = self.size()?;
        self.region.ensure_mapped(frontier + preallocate)?;
        self.region.flush_async(frontier)
    }

    /// Synchronously flush every mapped page to disk.
    pub fn flush(&self) -> Result<()> {
        self.region.flush()
    }

    /// Current length of the backing file.
    pub fn file_len(&self) -> Result<u64> {
        self.region.file_len()
    }
}

impl fmt::Debug for MappedLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedLog")
            .field("path", &self.path())
            .field("readonly", &self.is_readonly())
            .field("closable", &self.closable)
            .finish()
    }
}
