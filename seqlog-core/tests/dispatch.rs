//! Integration tests for naming, ordering and callback dispatch.

use seqlog_core::prelude::*;
use seqlog_core::log::HEADER_SIZE;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

fn open_log(dir: &tempfile::TempDir, name: &str) -> Arc<MappedLog> {
    Arc::new(MappedLog::open(dir.path().join(name), &LogConfig::default()).unwrap())
}

fn sequence(log: &Arc<MappedLog>) -> Sequence {
    Sequence::new(Arc::clone(log), SequenceConfig::default())
}

fn count_records(log: &MappedLog, sub: SubStream) -> usize {
    let mut it = log.begin(sub);
    let mut n = 0;
    while let Some(record) = log.read(it).unwrap() {
        it = record.iter();
        n += 1;
    }
    n
}

#[derive(Debug, Clone, PartialEq)]
struct Delivery {
    peer: String,
    channel: String,
    time: i64,
    data: Vec<u8>,
}

#[test]
fn test_producer_consumer_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let log = open_log(&dir, "scenario.seqlog");
    let seq = sequence(&log);

    let producer = seq.peer_declare("producer1").unwrap();
    let consumer = seq.peer_declare("consumer1").unwrap();

    let deliveries = Rc::new(RefCell::new(Vec::new()));
    {
        let deliveries = Rc::clone(&deliveries);
        let names = seq.downgrade();
        seq.prefix_subscribe(
            "main/",
            Rc::new(move |event: &DataEvent<'_>| {
                let Some(seq) = names.upgrade() else { return };
                deliveries.borrow_mut().push(Delivery {
                    peer: seq.peer_name(event.peer).unwrap(),
                    channel: seq.channel_name(event.channel).unwrap(),
                    time: event.time,
                    data: event.data.to_vec(),
                });
            }),
        )
        .unwrap();
    }

    let channel = seq.channel_declare(consumer, 0, "main/channel1").unwrap();
    seq.write(producer, channel, 1000, b"ABCD").unwrap();
    while seq.poll().unwrap() {}

    assert_eq!(
        *deliveries.borrow(),
        vec![Delivery {
            peer: "producer1".to_string(),
            channel: "main/channel1".to_string(),
            time: 1000,
            data: b"ABCD".to_vec(),
        }]
    );
}

#[test]
fn test_seek_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let log = open_log(&dir, "seek.seqlog");
    let seq = sequence(&log);
    let peer = seq.peer_declare("writer").unwrap();
    let channel = seq.channel_declare(peer, 0, "ticks").unwrap();

    let mut tells = vec![seq.log().tell(seq.log().end(SubStream::Data).unwrap())];
    for payload in [b"one".as_slice(), b"two", b"three"] {
        let offset = seq.write(peer, channel, 0, payload).unwrap();
        tells.push(offset);
    }
    assert!(tells.windows(2).all(|w| w[0] < w[1]));

    let reader = sequence(&log);
    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let seen = Rc::clone(&seen);
        reader
            .data_subscribe(
                channel,
                Rc::new(move |event: &DataEvent<'_>| seen.borrow_mut().push(event.data.to_vec())),
            )
            .unwrap();
    }
    reader.seek(tells[1]).unwrap();
    while reader.poll().unwrap() {}
    assert_eq!(*seen.borrow(), vec![b"two".to_vec(), b"three".to_vec()]);
}

#[test]
fn test_seek_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("restart.seqlog");
    let saved = {
        let seq = Sequence::open(&path, &Config::default()).unwrap();
        let peer = seq.peer_declare("w").unwrap();
        let channel = seq.channel_declare(peer, 0, "c").unwrap();
        seq.write(peer, channel, 1, b"a").unwrap();
        seq.write(peer, channel, 2, b"b").unwrap();
        while seq.poll().unwrap() {}
        let saved = seq.tell();
        seq.write(peer, channel, 3, b"c").unwrap();
        saved
    };

    let seq = Sequence::open(&path, &Config::default()).unwrap();
    seq.seek(saved).unwrap();
    let times = Rc::new(RefCell::new(Vec::new()));
    {
        let times = Rc::clone(&times);
        seq.prefix_subscribe("/", Rc::new(move |e: &DataEvent<'_>| times.borrow_mut().push(e.time)))
            .unwrap();
    }
    while seq.poll().unwrap() {}
    assert_eq!(*times.borrow(), vec![3]);
}

#[test]
fn test_idempotent_declaration_across_handles() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("idempotent.seqlog");
    let first = Sequence::open(&path, &Config::default()).unwrap();
    let second = Sequence::open(&path, &Config::default()).unwrap();

    let p1 = first.peer_declare("peer").unwrap();
    let p2 = second.peer_declare("peer").unwrap();
    assert_eq!(p1, p2);

    let c1 = first.channel_declare(p1, 0, "chan").unwrap();
    let c2 = second.channel_declare(p2, 10, "chan").unwrap();
    assert_eq!(c1, c2);

    assert_eq!(count_records(first.log(), SubStream::Announcements), 2);
}

#[test]
fn test_concurrent_declaration_writes_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.seqlog");
    MappedLog::open(&path, &LogConfig::default()).unwrap();

    let names: Vec<String> = (0..8).map(|i| format!("shared/{}", i)).collect();
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let path = path.clone();
            let names = names.clone();
            std::thread::spawn(move || {
                let seq = Sequence::open(&path, &Config::default()).unwrap();
                let peer = seq.peer_declare("racer").unwrap();
                names
                    .iter()
                    .map(|name| seq.channel_declare(peer, 0, name).unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(results.windows(2).all(|w| w[0] == w[1]));

    let log = MappedLog::open(&path, &LogConfig::default()).unwrap();
    assert_eq!(count_records(&log, SubStream::Announcements), 1 + names.len());
}

#[test]
fn test_causal_order_with_concurrent_writer() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("causal.seqlog");
    MappedLog::open(&path, &LogConfig::default()).unwrap();

    let writer = {
        let path = path.clone();
        std::thread::spawn(move || {
            let seq = Sequence::open(&path, &Config::default()).unwrap();
            let peer = seq.peer_declare("writer").unwrap();
            for i in 0..50 {
                let channel = seq.channel_declare(peer, i, &format!("topic/{}", i)).unwrap();
                seq.write(peer, channel, i, format!("{}", i).as_bytes()).unwrap();
            }
        })
    };

    let config = Config::default();
    let log = Arc::new(MappedLog::open(&path, &config.log).unwrap());
    let reader = Sequence::new(log, config.sequence.clone());
    let announced = Rc::new(RefCell::new(std::collections::HashSet::new()));
    let violations = Rc::new(Cell::new(0));
    let delivered = Rc::new(Cell::new(0));
    {
        let announced = Rc::clone(&announced);
        reader.on_channel(Rc::new(move |channel: ChannelId, _: &str| {
            announced.borrow_mut().insert(channel);
        }));
    }
    {
        let announced = Rc::clone(&announced);
        let violations = Rc::clone(&violations);
        let delivered = Rc::clone(&delivered);
        reader
            .prefix_subscribe(
                "topic/",
                Rc::new(move |event: &DataEvent<'_>| {
                    if !announced.borrow().contains(&event.channel) {
                        violations.set(violations.get() + 1);
                    }
                    delivered.set(delivered.get() + 1);
                }),
            )
            .unwrap();
    }

    while !writer.is_finished() {
        reader.poll().unwrap();
    }
    writer.join().unwrap();
    while reader.poll().unwrap() {}

    assert_eq!(violations.get(), 0);
    assert_eq!(delivered.get(), 50);
}

#[test]
fn test_prefix_matching_rules() {
    let dir = tempfile::tempdir().unwrap();
    let log = open_log(&dir, "prefix.seqlog");
    let seq = sequence(&log);
    let peer = seq.peer_declare("p").unwrap();

    let hits = Rc::new(RefCell::new(Vec::new()));
    let recorder = |tag: &'static str| -> DataCallback {
        let hits = Rc::clone(&hits);
        Rc::new(move |event: &DataEvent<'_>| {
            hits.borrow_mut()
                .push((tag, String::from_utf8_lossy(event.data).into_owned()))
        })
    };

    let abc = seq.channel_declare(peer, 0, "a/b/c").unwrap();
    seq.prefix_subscribe("a/", recorder("a/")).unwrap();
    seq.prefix_subscribe("/", recorder("root")).unwrap();
    let abc_exact = recorder("exact");
    seq.prefix_subscribe("a/b/c", abc_exact).unwrap();

    // Announced after the registrations.
    let other = seq.channel_declare(peer, 0, "ab/c").unwrap();

    seq.write(peer, abc, 0, b"abc").unwrap();
    seq.write(peer, other, 0, b"ab").unwrap();
    while seq.poll().unwrap() {}

    let hits = hits.borrow();
    assert!(hits.contains(&("a/", "abc".to_string())));
    assert!(hits.contains(&("exact", "abc".to_string())));
    assert!(hits.contains(&("root", "abc".to_string())));
    assert!(hits.contains(&("root", "ab".to_string())));
    assert!(!hits.contains(&("a/", "ab".to_string())));
    assert_eq!(hits.len(), 4);
}

#[test]
fn test_same_callback_under_overlapping_prefixes_fires_once() {
    let dir = tempfile::tempdir().unwrap();
    let log = open_log(&dir, "overlap.seqlog");
    let seq = sequence(&log);
    let peer = seq.peer_declare("p").unwrap();
    let channel = seq.channel_declare(peer, 0, "x/y").unwrap();

    let calls = Rc::new(Cell::new(0));
    let cb: DataCallback = {
        let calls = Rc::clone(&calls);
        Rc::new(move |_: &DataEvent<'_>| calls.set(calls.get() + 1))
    };
    seq.prefix_subscribe("/", Rc::clone(&cb)).unwrap();
    seq.prefix_subscribe("x/", Rc::clone(&cb)).unwrap();
    seq.data_subscribe(channel, Rc::clone(&cb)).unwrap();

    seq.write(peer, channel, 0, b"once").unwrap();
    while seq.poll().unwrap() {}
    assert_eq!(calls.get(), 1);

    // Still covered by "/" after dropping "x/".
    assert!(seq.prefix_unsubscribe("x/", &cb));
    seq.write(peer, channel, 0, b"twice").unwrap();
    while seq.poll().unwrap() {}
    assert_eq!(calls.get(), 2);
}

#[test]
fn test_prefix_unsubscribe_detaches_present_and_future_channels() {
    let dir = tempfile::tempdir().unwrap();
    let log = open_log(&dir, "prefix_unsub.seqlog");
    let seq = sequence(&log);
    let peer = seq.peer_declare("p").unwrap();
    let old = seq.channel_declare(peer, 0, "a/old").unwrap();
    let outside = seq.channel_declare(peer, 0, "b/kept").unwrap();

    let calls = Rc::new(Cell::new(0));
    let cb: DataCallback = {
        let calls = Rc::clone(&calls);
        Rc::new(move |_: &DataEvent<'_>| calls.set(calls.get() + 1))
    };
    let other_calls = Rc::new(Cell::new(0));
    let other: DataCallback = {
        let calls = Rc::clone(&other_calls);
        Rc::new(move |_: &DataEvent<'_>| calls.set(calls.get() + 1))
    };
    seq.prefix_subscribe("a/", Rc::clone(&cb)).unwrap();
    seq.prefix_subscribe("b/", Rc::clone(&other)).unwrap();
    seq.drain().unwrap();

    assert!(seq.prefix_unsubscribe("a/", &cb));
    assert!(!seq.prefix_unsubscribe("a/", &cb));

    let new = seq.channel_declare(peer, 0, "a/new").unwrap();
    seq.write(peer, old, 1, b"old").unwrap();
    seq.write(peer, new, 2, b"new").unwrap();
    seq.write(peer, outside, 3, b"kept").unwrap();
    seq.drain().unwrap();

    assert_eq!(calls.get(), 0);
    assert_eq!(other_calls.get(), 1);
}

#[test]
fn test_removal_during_dispatch() {
    let dir = tempfile::tempdir().unwrap();
    let log = open_log(&dir, "removal.seqlog");
    let seq = sequence(&log);
    let peer = seq.peer_declare("p").unwrap();
    let channel = seq.channel_declare(peer, 0, "c").unwrap();

    let order = Rc::new(RefCell::new(Vec::new()));
    let tagged = |tag: u32| -> DataCallback {
        let order = Rc::clone(&order);
        Rc::new(move |_: &DataEvent<'_>| order.borrow_mut().push(tag))
    };
    let first = tagged(1);
    let last = tagged(4);
    let remover: DataCallback = {
        let order = Rc::clone(&order);
        let weak = seq.downgrade();
        let (first, last) = (Rc::clone(&first), Rc::clone(&last));
        Rc::new(move |_: &DataEvent<'_>| {
            order.borrow_mut().push(3);
            if let Some(seq) = weak.upgrade() {
                seq.data_unsubscribe(channel, &first);
                seq.data_unsubscribe(channel, &last);
            }
        })
    };

    seq.data_subscribe(channel, Rc::clone(&first)).unwrap();
    seq.data_subscribe(channel, tagged(2)).unwrap();
    seq.data_subscribe(channel, remover).unwrap();
    seq.data_subscribe(channel, Rc::clone(&last)).unwrap();

    seq.write(peer, channel, 0, b"1").unwrap();
    seq.write(peer, channel, 0, b"2").unwrap();
    while seq.poll().unwrap() {}

    assert_eq!(*order.borrow(), vec![1, 2, 3, 2, 3]);
}

#[test]
fn test_announcement_callbacks_fire_once_per_id() {
    let dir = tempfile::tempdir().unwrap();
    let log = open_log(&dir, "once.seqlog");
    let writer = sequence(&log);
    let a = writer.peer_declare("a").unwrap();
    let b = writer.peer_declare("b").unwrap();
    let shared = writer.channel_declare(a, 0, "shared").unwrap();
    writer.stream_declare(b, shared).unwrap();
    writer.peer_declare("a").unwrap();

    let reader = sequence(&log);
    let peers = Rc::new(RefCell::new(Vec::new()));
    let channels = Rc::new(Cell::new(0));
    let streams = Rc::new(Cell::new(0));
    {
        let peers = Rc::clone(&peers);
        reader.on_peer(Rc::new(move |_: PeerId, name: &str| {
            peers.borrow_mut().push(name.to_string())
        }));
        let channels = Rc::clone(&channels);
        reader.on_channel(Rc::new(move |_: ChannelId, _: &str| channels.set(channels.get() + 1)));
        let streams = Rc::clone(&streams);
        reader.on_stream(Rc::new(move |_: &StreamEvent<'_>| streams.set(streams.get() + 1)));
    }
    while reader.poll().unwrap() {}

    assert_eq!(*peers.borrow(), vec!["a".to_string(), "b".to_string()]);
    assert_eq!(channels.get(), 1);
    assert_eq!(streams.get(), 2);
}

#[test]
fn test_directory_publish_dedup_is_per_process() {
    let dir = tempfile::tempdir().unwrap();
    let log = open_log(&dir, "publish.seqlog");
    let first = sequence(&log);
    let second = sequence(&log);

    assert!(first.directory_publish(b"want:main/").unwrap());
    assert!(!first.directory_publish(b"want:main/").unwrap());
    assert!(second.directory_publish(b"want:main/").unwrap());

    // Unlike names, published messages are not deduplicated through the log.
    assert_eq!(count_records(&log, SubStream::Subscriptions), 2);
}

#[test]
fn test_consume_hands_off_without_loss_or_duplication() {
    let dir = tempfile::tempdir().unwrap();
    let log = open_log(&dir, "consume.seqlog");
    let writer = sequence(&log);
    let peer = writer.peer_declare("w").unwrap();
    let channel = writer.channel_declare(peer, 0, "feed/a").unwrap();
    writer.write(peer, channel, 1, b"1").unwrap();

    let old = sequence(&log);
    let seen = Rc::new(RefCell::new(Vec::new()));
    {
        let seen = Rc::clone(&seen);
        old.prefix_subscribe("feed/", Rc::new(move |e: &DataEvent<'_>| seen.borrow_mut().push(e.time)))
            .unwrap();
    }
    while old.poll().unwrap() {}

    let new = sequence(&log);
    new.seek(old.tell()).unwrap();
    while new.cursor().tell_announcements() != old.cursor().tell_announcements() {
        assert!(new.poll().unwrap());
    }
    new.consume(&old).unwrap();

    writer.write(peer, channel, 2, b"2").unwrap();
    let late = writer.channel_declare(peer, 0, "feed/b").unwrap();
    writer.write(peer, late, 3, b"3").unwrap();

    while old.poll().unwrap() {}
    while new.poll().unwrap() {}
    assert_eq!(*seen.borrow(), vec![1, 2, 3]);
}

#[test]
fn test_seek_rejects_stale_offsets() {
    let dir = tempfile::tempdir().unwrap();
    let log = open_log(&dir, "stale.seqlog");
    let seq = sequence(&log);
    let peer = seq.peer_declare("p").unwrap();
    let channel = seq.channel_declare(peer, 0, "c").unwrap();
    let offset = seq.write(peer, channel, 0, b"gone").unwrap();

    let it = log.seek(offset).unwrap();
    log.remove(it).unwrap();
    assert!(matches!(
        seq.seek(offset),
        Err(SeqlogError::AlreadyRemoved { .. })
    ));
    assert!(seq.seek(Offset::new(HEADER_SIZE + 3)).is_err());
    assert!(seq.seek(SubStream::Data.sentinel()).is_ok());
}

#[test]
fn test_seek_rejects_records_of_other_sub_streams() {
    let dir = tempfile::tempdir().unwrap();
    let log = open_log(&dir, "foreign.seqlog");
    let seq = sequence(&log);
    let peer = seq.peer_declare("p").unwrap();
    let channel = seq.channel_declare(peer, 0, "main/c").unwrap();
    let data = seq.write(peer, channel, 7, b"payload").unwrap();
    let stream = seq.cursor().directory().stream_id(peer, channel).unwrap();
    let first_index = seq.index_write(stream, data, b"key-one").unwrap();
    seq.index_write(stream, data, b"key-two").unwrap();

    let reader = sequence(&log);
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    reader
        .prefix_subscribe(
            "main/",
            Rc::new(move |event: &DataEvent<'_>| {
                sink.borrow_mut().push((event.time, event.data.to_vec()))
            }),
        )
        .unwrap();

    let announcement = log.read(log.begin(SubStream::Announcements)).unwrap().unwrap();
    for foreign in [first_index, announcement.offset()] {
        assert!(matches!(
            reader.seek(foreign),
            Err(SeqlogError::InvalidOffset { .. })
        ));
    }
    assert_eq!(reader.tell(), SubStream::Data.sentinel());

    reader.drain().unwrap();
    assert_eq!(*seen.borrow(), vec![(7, b"payload".to_vec())]);
}

#[test]
fn test_subscription_marker_failure_keeps_announcement_order() {
    let dir = tempfile::tempdir().unwrap();
    let config = LogConfig::default().with_closable(true);
    let log = Arc::new(MappedLog::open(dir.path().join("marker.seqlog"), &config).unwrap());
    let writer = sequence(&log);
    let peer = writer.peer_declare("p").unwrap();
    let channel = writer.channel_declare(peer, 0, "main/c").unwrap();
    writer.write(peer, channel, 1, b"first").unwrap();
    log.close(SubStream::Subscriptions).unwrap();

    let reader = sequence(&log);
    let order = Rc::new(RefCell::new(Vec::new()));
    {
        let order = Rc::clone(&order);
        reader.on_stream(Rc::new(move |_: &StreamEvent<'_>| order.borrow_mut().push("stream")));
    }
    {
        let order = Rc::clone(&order);
        reader
            .prefix_subscribe("main/", Rc::new(move |_: &DataEvent<'_>| order.borrow_mut().push("data")))
            .unwrap();
    }
    while reader.poll().unwrap() {}
    assert_eq!(*order.borrow(), vec!["stream", "data"]);
    let stream = reader.cursor().directory().stream_id(peer, channel).unwrap();
    assert!(!reader.is_subscribed(stream).unwrap());

    // Attaching to a known channel still succeeds when the marker cannot be written.
    let late = Rc::new(Cell::new(0));
    let cb: DataCallback = {
        let late = Rc::clone(&late);
        Rc::new(move |_: &DataEvent<'_>| late.set(late.get() + 1))
    };
    assert!(reader.data_subscribe(channel, Rc::clone(&cb)).unwrap());
    assert!(!reader.data_subscribe(channel, cb).unwrap());
    writer.write(peer, channel, 2, b"second").unwrap();
    while reader.poll().unwrap() {}
    assert_eq!(late.get(), 1);
}
