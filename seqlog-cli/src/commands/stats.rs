//! Stats command - record counts and directory contents of a log.

use super::open_existing;
use anyhow::{Context, Result};
use seqlog_core::{Directory, MappedLog, SubStream};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Record count of one sub-stream.
#[derive(Debug, Serialize)]
pub struct SubStreamStats {
    /// Sub-stream name.
    pub sub_stream: SubStream,
    /// Linked records.
    pub records: u64,
    /// Payload bytes of the linked records.
    pub payload_bytes: u64,
    /// Whether the sub-stream was closed.
    pub closed: bool,
}

/// A declared stream.
#[derive(Debug, Serialize)]
pub struct StreamSummary {
    /// Stream id.
    pub id: u64,
    /// Owning peer name.
    pub peer: String,
    /// Channel name.
    pub channel: String,
    /// Payload encoding, empty when unspecified.
    pub encoding: String,
    /// Whether a reader marked the stream as subscribed.
    pub subscribed: bool,
}

/// Everything the stats command reports.
#[derive(Debug, Serialize)]
pub struct StatsReport {
    /// Path of the log.
    pub path: String,
    /// File length on disk.
    pub file_len: u64,
    /// Reserved bytes.
    pub size: u64,
    /// Per sub-stream counts.
    pub sub_streams: Vec<SubStreamStats>,
    /// Peer names in declaration order.
    pub peers: Vec<String>,
    /// Channel names in declaration order.
    pub channels: Vec<String>,
    /// Declared streams.
    pub streams: Vec<StreamSummary>,
}

/// Run the stats command.
pub fn run(path: &Path, json: bool) -> Result<()> {
    let log = open_existing(path, true)?;
    let report = collect(&log)?;

    if json {
        let out = serde_json::to_string_pretty(&report).context("Failed to encode stats")?;
        println!("{}", out);
        return Ok(());
    }

    println!("Log Statistics");
    println!("==============");
    println!("Path:      {}", report.path);
    println!("File size: {} bytes", report.file_len);
    println!("Reserved:  {} bytes", report.size);
    println!();
    println!("{:<15} {:>10} {:>14} {:>7}", "SUB-STREAM", "RECORDS", "BYTES", "CLOSED");
    for sub in &report.sub_streams {
        println!(
            "{:<15} {:>10} {:>14} {:>7}",
            sub.sub_stream.name(),
            sub.records,
            sub.payload_bytes,
            if sub.closed { "yes" } else { "no" }
        );
    }
    println!();
    println!("Peers ({}): {}", report.peers.len(), report.peers.join(", "));
    println!("Channels ({}): {}", report.channels.len(), report.channels.join(", "));
    println!("Streams ({}):", report.streams.len());
    for stream in &report.streams {
        println!(
            "  {:>10}  {} -> {}{}{}",
            stream.id,
            stream.peer,
            stream.channel,
            if stream.encoding.is_empty() {
                String::new()
            } else {
                format!(" [{}]", stream.encoding)
            },
            if stream.subscribed { " (subscribed)" } else { "" }
        );
    }

    Ok(())
}

/// Walk every sub-stream and replay the directory.
pub fn collect(log: &Arc<MappedLog>) -> Result<StatsReport> {
    let mut sub_streams = Vec::with_capacity(SubStream::ALL.len());
    for sub in SubStream::ALL {
        let mut records = 0;
        let mut payload_bytes = 0;
        let mut it = log.begin(sub);
        while let Some(record) = log
            .read(it)
            .with_context(|| format!("Failed to walk {} sub-stream", sub))?
        {
            records += 1;
            payload_bytes += record.data().len() as u64;
            it = record.iter();
        }
        sub_streams.push(SubStreamStats {
            sub_stream: sub,
            records,
            payload_bytes,
            closed: log.is_closed(sub)?,
        });
    }

    let mut directory = Directory::new(Arc::clone(log));
    directory.replay().context("Failed to replay announcements")?;

    let mut streams = Vec::new();
    let mut infos: Vec<_> = directory.streams().cloned().collect();
    infos.sort_by_key(|info| info.id);
    for info in infos {
        streams.push(StreamSummary {
            id: info.id.as_u64(),
            peer: directory.peer_name(info.peer)?.to_string(),
            channel: directory.channel_name(info.channel)?.to_string(),
            encoding: info.encoding.to_string(),
            subscribed: directory.is_subscribed(info.id)?,
        });
    }

    Ok(StatsReport {
        path: log.path().display().to_string(),
        file_len: log.file_len()?,
        size: log.size()?,
        sub_streams,
        peers: directory.peers().map(|(_, name)| name.to_string()).collect(),
        channels: directory.channels().map(|(_, name)| name.to_string()).collect(),
        streams,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use seqlog_core::{Config, Sequence};

    #[test]
    fn counts_records_and_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.log");
        let seq = Sequence::open(&path, &Config::default()).unwrap();
        let peer = seq.peer_declare("producer1").unwrap();
        let channel = seq.channel_declare(peer, 0, "main/channel1").unwrap();
        seq.write(peer, channel, 1, b"ABCD").unwrap();
        seq.write(peer, channel, 2, b"EF").unwrap();

        let report = collect(seq.log()).unwrap();
        assert_eq!(report.sub_streams[0].records, 2);
        assert_eq!(report.sub_streams[1].records, 2);
        assert_eq!(report.sub_streams[2].records, 0);
        assert_eq!(report.peers, vec!["producer1".to_string()]);
        assert_eq!(report.channels, vec!["main/channel1".to_string()]);
        assert_eq!(report.streams.len(), 1);
        assert_eq!(report.streams[0].peer, "producer1");
        assert!(!report.streams[0].subscribed);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["sub_streams"][0]["sub_stream"], "data");
    }
}
