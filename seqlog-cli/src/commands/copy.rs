//! Copy command - replay the data of one log into another by name.

use super::open_existing;
use anyhow::{Context, Result};
use seqlog_core::cursor::{ChannelCallback, DataCallback, PeerCallback};
use seqlog_core::{
    ChannelId, Config, DataEvent, MappedLog, PeerId, Sequence, SequenceConfig, StreamId,
};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

/// Translates source ids into destination ids, declaring names on first use.
struct Remap {
    dst: Sequence,
    peer_names: HashMap<PeerId, String>,
    channel_names: HashMap<ChannelId, String>,
    peers: HashMap<PeerId, PeerId>,
    streams: HashMap<StreamId, (PeerId, ChannelId)>,
}

impl Remap {
    fn new(dst: Sequence) -> Self {
        Self {
            dst,
            peer_names: HashMap::new(),
            channel_names: HashMap::new(),
            peers: HashMap::new(),
            streams: HashMap::new(),
        }
    }

    fn copy(&mut self, event: &DataEvent<'_>) -> Result<()> {
        let (peer, channel) = match self.streams.get(&event.stream) {
            Some(ids) => *ids,
            None => {
                let ids = self.declare(event)?;
                self.streams.insert(event.stream, ids);
                ids
            }
        };
        self.dst
            .write(peer, channel, event.time, event.data)
            .with_context(|| format!("Failed to copy record at {}", event.offset))?;
        Ok(())
    }

    fn declare(&mut self, event: &DataEvent<'_>) -> Result<(PeerId, ChannelId)> {
        let peer = match self.peers.get(&event.peer) {
            Some(peer) => *peer,
            None => {
                let name = self
                    .peer_names
                    .get(&event.peer)
                    .with_context(|| format!("No announcement for {}", event.peer))?;
                let peer = self.dst.peer_declare(name)?;
                self.peers.insert(event.peer, peer);
                peer
            }
        };
        let channel_name = self
            .channel_names
            .get(&event.channel)
            .with_context(|| format!("No announcement for {}", event.channel))?;
        let channel = self.dst.channel_declare(peer, event.time, channel_name)?;
        Ok((peer, channel))
    }
}

/// Run the copy command.
pub fn run(src: &Path, dst: &Path) -> Result<()> {
    let source = open_existing(src, true)?;
    let target = Arc::new(
        MappedLog::open(dst, &Config::default().log)
            .with_context(|| format!("Failed to open destination: {}", dst.display()))?,
    );
    let copied = copy_log(source, target)?;
    println!("Copied {} records from {} to {}", copied, src.display(), dst.display());
    Ok(())
}

/// Copy every data record of `src` into `dst`. Returns the number copied.
pub fn copy_log(src: Arc<MappedLog>, dst: Arc<MappedLog>) -> Result<usize> {
    let source = Sequence::new(
        src,
        SequenceConfig {
            announce_subscriptions: false,
        },
    );
    let target = Sequence::new(dst, SequenceConfig::default());
    let remap = Rc::new(RefCell::new(Remap::new(target.clone())));
    let failure: Rc<RefCell<Option<anyhow::Error>>> = Rc::new(RefCell::new(None));
    let copied = Rc::new(Cell::new(0usize));

    let on_peer: PeerCallback = {
        let remap = Rc::clone(&remap);
        Rc::new(move |id: PeerId, name: &str| {
            remap.borrow_mut().peer_names.insert(id, name.to_string());
        })
    };
    let on_channel: ChannelCallback = {
        let remap = Rc::clone(&remap);
        Rc::new(move |id: ChannelId, name: &str| {
            remap.borrow_mut().channel_names.insert(id, name.to_string());
        })
    };
    let on_data: DataCallback = {
        let remap = Rc::clone(&remap);
        let failure = Rc::clone(&failure);
        let copied = Rc::clone(&copied);
        Rc::new(move |event: &DataEvent<'_>| {
            if failure.borrow().is_some() {
                return;
            }
            match remap.borrow_mut().copy(event) {
                Ok(()) => copied.set(copied.get() + 1),
                Err(e) => *failure.borrow_mut() = Some(e),
            }
        })
    };
    source.on_peer(on_peer);
    source.on_channel(on_channel);
    source.prefix_subscribe(seqlog_core::glob::ROOT_PREFIX, on_data)?;

    while source.poll().context("Failed to read source log")? {
        if let Some(e) = failure.borrow_mut().take() {
            return Err(e);
        }
    }
    target.log().flush().context("Failed to flush destination")?;
    tracing::info!(records = copied.get(), "copy finished");
    Ok(copied.get())
}
