use std::sync::mpsc;
use std::time::{Duration, Instant, SystemTime};

use holdback::{DelayQueue, QueueExport};
use tempfile::tempdir;

#[test]
fn export_yields_payloads_with_original_timestamps() {
    let dir = tempdir().expect("tempdir");
    let file = dir.path().join("queue.db");
    let before = SystemTime::now();

    let mut queue = DelayQueue::writable(
        Duration::from_secs(3600),
        100,
        &file,
        |_| panic!("delay has not elapsed"),
        |_| {},
    )
    .expect("open queue");
    for payload in [b"alpha".as_slice(), b"beta", b"gamma"] {
        queue.add(payload.to_vec());
    }
    // Adds are processed before stop flushes the mapping.
    std::thread::sleep(Duration::from_millis(200));
    queue.stop();

    let export = QueueExport::open(&file).expect("open export");
    assert_eq!(export.elements(), 100);
    assert_eq!(export.live_entries(), 3);

    let mut entries = Vec::new();
    export.export(|timestamp, payload| entries.push((timestamp, payload.to_vec())));
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].1, b"alpha");
    assert_eq!(entries[1].1, b"beta");
    assert_eq!(entries[2].1, b"gamma");

    let after = SystemTime::now();
    let mut prev = before;
    for (timestamp, _) in &entries {
        assert!(*timestamp >= prev, "timestamps non-decreasing");
        assert!(*timestamp <= after);
        prev = *timestamp;
    }
}

#[test]
fn writable_reopen_recovers_live_chains() {
    let dir = tempdir().expect("tempdir");
    let file = dir.path().join("queue.db");

    let mut queue = DelayQueue::writable(
        Duration::from_secs(3600),
        20,
        &file,
        |_| {},
        |_| {},
    )
    .expect("open queue");
    for i in 0..3 {
        queue.add(format!("old-{i}").into_bytes());
    }
    std::thread::sleep(Duration::from_millis(200));
    queue.stop();

    // New writes after reopen must not land on the recovered chains.
    let mut queue = DelayQueue::writable(
        Duration::from_secs(3600),
        20,
        &file,
        |_| {},
        |_| {},
    )
    .expect("reopen queue");
    for i in 0..3 {
        queue.add(format!("new-{i}").into_bytes());
    }
    std::thread::sleep(Duration::from_millis(200));
    queue.stop();

    let export = QueueExport::open(&file).expect("open export");
    assert_eq!(export.live_entries(), 6);
    let mut payloads = Vec::new();
    export.export(|_, payload| payloads.push(payload.to_vec()));
    let expected: Vec<Vec<u8>> = ["old-0", "old-1", "old-2", "new-0", "new-1", "new-2"]
        .iter()
        .map(|s| s.as_bytes().to_vec())
        .collect();
    assert_eq!(payloads, expected);
}

#[test]
fn reopen_delivers_entries_that_expired_while_closed() {
    let dir = tempdir().expect("tempdir");
    let file = dir.path().join("queue.db");
    let delay = Duration::from_millis(200);

    let mut queue = DelayQueue::writable(delay, 10, &file, |_| {}, |_| {}).expect("open queue");
    queue.add(b"first".to_vec());
    queue.add(b"second".to_vec());
    std::thread::sleep(Duration::from_millis(50));
    queue.stop();

    // Let the delay elapse while no queue is running.
    std::thread::sleep(Duration::from_millis(300));

    let (submit_tx, submit_rx) = mpsc::channel();
    let started = Instant::now();
    let mut queue = DelayQueue::writable(
        delay,
        10,
        &file,
        move |payload| {
            let _ = submit_tx.send(payload);
        },
        |_| {},
    )
    .expect("reopen queue");

    let first = submit_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("recovered entry submitted");
    let second = submit_rx
        .recv_timeout(Duration::from_secs(2))
        .expect("recovered entry submitted");
    assert_eq!(first, b"first".to_vec());
    assert_eq!(second, b"second".to_vec());
    assert!(started.elapsed() < Duration::from_secs(2));
    queue.stop();
}

#[test]
fn export_capacity_derives_from_file_size() {
    let dir = tempdir().expect("tempdir");
    let file = dir.path().join("queue.db");

    let mut queue =
        DelayQueue::writable(Duration::from_secs(3600), 42, &file, |_| {}, |_| {}).expect("open");
    queue.stop();

    let export = QueueExport::open(&file).expect("open export");
    assert_eq!(export.elements(), 42);
    assert_eq!(export.live_entries(), 0);
}
