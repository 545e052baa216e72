//! Versioned entry-point table for embedders.
//!
//! Hosts that load the engine through a plugin or FFI shim receive a
//! `&'static SequenceApi` and call through its function pointers. Handle
//! lifetime stays with the engine: `incref` hands out another strong
//! handle and `decref` releases one.

use super::{DataReservation, Sequence};
use crate::error::Result;
use crate::types::{ChannelId, Offset, PeerId};

/// Version of [`SEQUENCE_API_V1`].
pub const SEQUENCE_API_VERSION: u32 = 1;

/// Function-pointer table over a [`Sequence`].
#[derive(Clone, Copy)]
pub struct SequenceApi {
    /// Table version. Fields are only ever appended.
    pub version: u32,
    /// See [`Sequence::reserve`].
    pub reserve: for<'a> fn(&'a Sequence, usize) -> Result<DataReservation<'a>>,
    /// See [`Sequence::commit`].
    pub commit: fn(&Sequence, PeerId, ChannelId, i64, DataReservation<'_>) -> Result<Offset>,
    /// See [`Sequence::peer_declare`].
    pub peer_declare: fn(&Sequence, &str) -> Result<PeerId>,
    /// See [`Sequence::channel_declare`].
    pub channel_declare: fn(&Sequence, PeerId, i64, &str) -> Result<ChannelId>,
    /// See [`Sequence::poll`].
    pub poll: fn(&Sequence) -> Result<bool>,
    /// See [`Sequence::seek`].
    pub seek: fn(&Sequence, Offset) -> Result<()>,
    /// See [`Sequence::tell`].
    pub tell: fn(&Sequence) -> Offset,
    /// Take another strong handle.
    pub incref: fn(&Sequence) -> Sequence,
    /// Release a strong handle.
    pub decref: fn(Sequence),
}

impl SequenceApi {
    /// Whether this table provides at least `version`.
    pub fn supports(&self, version: u32) -> bool {
        self.version >= version
    }
}

impl std::fmt::Debug for SequenceApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceApi")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

fn incref(sequence: &Sequence) -> Sequence {
    sequence.clone()
}

fn decref(sequence: Sequence) {
    drop(sequence);
}

/// First version of the entry-point table.
pub static SEQUENCE_API_V1: SequenceApi = SequenceApi {
    version: SEQUENCE_API_VERSION,
    reserve: Sequence::reserve,
    commit: Sequence::commit,
    peer_declare: Sequence::peer_declare,
    channel_declare: Sequence::channel_declare,
    poll: Sequence::poll,
    seek: Sequence::seek,
    tell: Sequence::tell,
    incref,
    decref,
};

impl Sequence {
    /// The entry-point table of this build.
    pub fn api() -> &'static SequenceApi {
        &SEQUENCE_API_V1
    }
}
