//! Tail command - print announcements and data as the cursor reaches them.

use super::{open_existing, render_payload};
use anyhow::{Context, Result};
use seqlog_core::cursor::{ChannelCallback, DataCallback, PeerCallback, StreamCallback};
use seqlog_core::{ChannelId, DataEvent, PeerId, Sequence, SequenceConfig, StreamEvent};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::time::Duration;

/// Options of the tail command.
#[derive(Debug, Clone)]
pub struct TailOptions {
    /// Keep polling after reaching the end.
    pub follow: bool,
    /// Channel prefix whose data is printed.
    pub prefix: String,
    /// Skip the data already in the log.
    pub from_end: bool,
    /// Sleep between polls while following.
    pub interval: Duration,
}

#[derive(Default)]
struct Names {
    peers: HashMap<PeerId, String>,
    channels: HashMap<ChannelId, String>,
}

impl Names {
    fn peer(&self, id: PeerId) -> String {
        self.peers.get(&id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn channel(&self, id: ChannelId) -> String {
        self.channels.get(&id).cloned().unwrap_or_else(|| id.to_string())
    }
}

/// Run the tail command.
pub fn run(path: &Path, options: &TailOptions) -> Result<()> {
    tracing::info!(path = %path.display(), prefix = %options.prefix, "Tailing log");

    let log = open_existing(path, true)?;
    let config = SequenceConfig {
        announce_subscriptions: false,
    };
    let seq = if options.from_end {
        Sequence::at_end(log, config).context("Failed to position at end of log")?
    } else {
        Sequence::new(log, config)
    };

    let names = Rc::new(RefCell::new(Names::default()));
    attach(&seq, &names, &options.prefix)?;

    loop {
        let processed = seq
            .drain()
            .with_context(|| format!("Failed to read log at {}", seq.tell()))?;
        tracing::debug!(processed, "drained");
        if !options.follow {
            return Ok(());
        }
        std::thread::sleep(options.interval);
    }
}

fn attach(seq: &Sequence, names: &Rc<RefCell<Names>>, prefix: &str) -> Result<()> {
    let on_peer: PeerCallback = {
        let names = Rc::clone(names);
        Rc::new(move |id: PeerId, name: &str| {
            names.borrow_mut().peers.insert(id, name.to_string());
            println!("peer     {} {}", id, name);
        })
    };
    let on_channel: ChannelCallback = {
        let names = Rc::clone(names);
        Rc::new(move |id: ChannelId, name: &str| {
            names.borrow_mut().channels.insert(id, name.to_string());
            println!("channel  {} {}", id, name);
        })
    };
    let on_stream: StreamCallback = {
        let names = Rc::clone(names);
        Rc::new(move |event: &StreamEvent<'_>| {
            let names = names.borrow();
            println!(
                "stream   {} {} {} encoding={:?} time={}",
                event.stream,
                names.peer(event.peer),
                names.channel(event.channel),
                event.encoding,
                event.time
            );
        })
    };
    let on_data: DataCallback = {
        let names = Rc::clone(names);
        Rc::new(move |event: &DataEvent<'_>| {
            println!("{}", format_data(&names.borrow(), event));
        })
    };

    seq.on_peer(on_peer);
    seq.on_channel(on_channel);
    seq.on_stream(on_stream);
    seq.prefix_subscribe(prefix, on_data)
        .with_context(|| format!("Invalid prefix: {}", prefix))
}

fn format_data(names: &Names, event: &DataEvent<'_>) -> String {
    format!(
        "data     #{} @{} {} {} time={} {}",
        event.seqno,
        event.offset,
        names.peer(event.peer),
        names.channel(event.channel),
        event.time,
        render_payload(event.data)
    )
}
