//! Integration tests for the mapped log across reopen and concurrent writers.
//!
//! Separate `MappedLog` instances over one file stand in for separate
//! processes: each has its own mapping and shares state only through the
//! file.

use seqlog_core::log::HEADER_SIZE;
use seqlog_core::{LogConfig, MappedLog, Offset, SeqlogError, SubStream};
use std::collections::HashSet;
use std::sync::Arc;

fn read_all(log: &MappedLog, sub: SubStream) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut it = log.begin(sub);
    while let Some(record) = log.read(it).unwrap() {
        out.push(record.data().to_vec());
        it = record.iter();
    }
    out
}

#[test]
fn test_round_trip_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("roundtrip.seqlog");
    let payloads: Vec<Vec<u8>> = (0..200u32)
        .map(|i| format!("record-{}-{}", i, "x".repeat((i % 17) as usize)).into_bytes())
        .collect();

    {
        let log = MappedLog::open(&path, &LogConfig::default()).unwrap();
        for payload in &payloads {
            log.append(SubStream::Data, payload).unwrap();
        }
        log.flush().unwrap();
    }

    let log = MappedLog::open(&path, &LogConfig::default()).unwrap();
    assert_eq!(read_all(&log, SubStream::Data), payloads);

    let readonly = MappedLog::open(&path, &LogConfig::default().with_readonly(true)).unwrap();
    assert_eq!(read_all(&readonly, SubStream::Data), payloads);
}

#[test]
fn test_offsets_resume_in_a_new_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("resume.seqlog");

    let saved = {
        let log = MappedLog::open(&path, &LogConfig::default()).unwrap();
        log.append(SubStream::Data, b"first").unwrap();
        let it = log.append(SubStream::Data, b"second").unwrap();
        log.append(SubStream::Data, b"third").unwrap();
        log.tell(it)
    };

    let log = MappedLog::open(&path, &LogConfig::default()).unwrap();
    let it = log.seek(saved).unwrap();
    assert_eq!(log.read(it).unwrap().unwrap().data(), b"third");
}

#[test]
fn test_concurrent_writers_lose_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("concurrent.seqlog");
    MappedLog::open(&path, &LogConfig::default()).unwrap();

    let writers = 4;
    let per_writer = 500;
    let handles: Vec<_> = (0..writers)
        .map(|w| {
            let path = path.clone();
            std::thread::spawn(move || {
                let log = MappedLog::open(&path, &LogConfig::default()).unwrap();
                for i in 0..per_writer {
                    log.append(SubStream::Data, format!("{}:{}", w, i).as_bytes())
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let log = MappedLog::open(&path, &LogConfig::default()).unwrap();
    let records = read_all(&log, SubStream::Data);
    assert_eq!(records.len(), writers * per_writer);

    let unique: HashSet<_> = records.iter().collect();
    assert_eq!(unique.len(), records.len());

    // Each writer's own records stay in commit order.
    for w in 0..writers {
        let prefix = format!("{}:", w);
        let own: Vec<usize> = records
            .iter()
            .filter_map(|r| std::str::from_utf8(r).ok())
            .filter_map(|r| r.strip_prefix(&prefix))
            .map(|i| i.parse().unwrap())
            .collect();
        assert_eq!(own, (0..per_writer).collect::<Vec<_>>());
    }

    // Sequence numbers are dense.
    let mut it = log.begin(SubStream::Data);
    let mut expected = 1;
    while let Some(record) = log.read(it).unwrap() {
        assert_eq!(record.seqno(), expected);
        expected += 1;
        it = record.iter();
    }
}

#[test]
fn test_shared_log_between_threads() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(MappedLog::open(dir.path().join("shared.seqlog"), &LogConfig::default()).unwrap());

    let handles: Vec<_> = (0..3)
        .map(|t| {
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                for i in 0..100u32 {
                    let sub = if i % 2 == 0 { SubStream::Data } else { SubStream::Index };
                    log.append(sub, &[t as u8; 24]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(read_all(&log, SubStream::Data).len(), 150);
    assert_eq!(read_all(&log, SubStream::Index).len(), 150);
}

#[test]
fn test_format_guard() {
    let dir = tempfile::tempdir().unwrap();

    let foreign = dir.path().join("foreign.bin");
    std::fs::write(&foreign, vec![0xAB; 4096]).unwrap();
    let err = MappedLog::open(&foreign, &LogConfig::default()).unwrap_err();
    assert!(matches!(err, SeqlogError::InvalidFormat { .. }));
    assert!(err.is_fatal());

    let path = dir.path().join("closable.seqlog");
    MappedLog::open(&path, &LogConfig::default().with_closable(true)).unwrap();
    let err = MappedLog::open(&path, &LogConfig::default()).unwrap_err();
    assert!(matches!(err, SeqlogError::ClosableMismatch { .. }));
    assert!(err.is_fatal());
    assert!(MappedLog::open(&path, &LogConfig::default().with_closable(true)).is_ok());
}

#[test]
fn test_invalid_seek_and_remove_keep_the_log_usable() {
    let dir = tempfile::tempdir().unwrap();
    let log = MappedLog::open(dir.path().join("errors.seqlog"), &LogConfig::default()).unwrap();
    let it = log.append(SubStream::Data, b"only").unwrap();

    assert!(log.seek(Offset::new(HEADER_SIZE + 8)).is_err());
    assert!(log.seek(Offset::new(1 << 40)).is_err());
    log.remove(it).unwrap();
    let err = log.remove(it).unwrap_err();
    assert!(!err.is_fatal());

    log.append(SubStream::Data, b"after").unwrap();
    assert_eq!(read_all(&log, SubStream::Data), vec![b"after".to_vec()]);
}
