use pretty_assertions::assert_eq;
use raft_log::{Entry, EntryType, Error, Fs, Log, Options};
use tempfile::TempDir;

fn enable_logging() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Trace)
        .format_timestamp(None)
        .is_test(true)
        .try_init();
}

fn entry(index: u64, term: u64) -> Entry {
    Entry::new(index, term, EntryType::Normal, format!("entry-{index}").into_bytes())
}

fn options(max_segment_size: u64) -> Options {
    Options {
        max_segment_size,
        starting_index: 1,
    }
}

/// S1: append a run of entries and read every one of them back.
#[test]
fn append_then_read_back() {
    let dir = TempDir::new().unwrap();
    let repo = Fs::new(dir.path()).unwrap();
    let mut log = Log::create(repo, options(4096)).unwrap();

    for i in 1..=10u64 {
        assert_eq!(log.append(&entry(i, 1)).unwrap(), i);
    }

    assert_eq!(log.first_index(), 1);
    assert_eq!(log.last_index(), 10);
    for i in 1..=10u64 {
        let got = log.get(i).unwrap().unwrap();
        assert_eq!(got.index, i);
        assert_eq!(got.payload, format!("entry-{i}").into_bytes());
    }
}

/// S1b: a small `max_segment_size` forces the log to roll across several
/// segments; reads must still route transparently to the right one.
#[test]
fn appends_roll_segments_and_stay_readable() {
    enable_logging();
    let dir = TempDir::new().unwrap();
    let repo = Fs::new(dir.path()).unwrap();
    // Each record is 10 bytes of header + a handful of payload bytes, so a
    // tiny cap forces a roll every couple of entries.
    let mut log = Log::create(repo, options(64)).unwrap();

    for i in 1..=30u64 {
        log.append(&entry(i, 1)).unwrap();
    }

    assert_eq!(log.last_index(), 30);
    for i in 1..=30u64 {
        assert_eq!(log.get(i).unwrap().unwrap().index, i);
    }
}

/// S2: appending at or below `next_index` is rejected.
#[test]
fn rejects_non_monotonic_appends() {
    let dir = TempDir::new().unwrap();
    let repo = Fs::new(dir.path()).unwrap();
    let mut log = Log::create(repo, options(4096)).unwrap();

    log.append(&entry(1, 1)).unwrap();
    log.append(&entry(2, 1)).unwrap();

    assert!(matches!(
        log.append(&entry(2, 1)),
        Err(Error::CommittedEntryModified { .. })
    ));
    assert!(matches!(
        log.append(&entry(10, 1)),
        Err(Error::NonMonotonicIndex { .. })
    ));
}

/// S3: truncate drops the conflicting tail, re-append succeeds at the new
/// term, and the old entries stay gone after a reopen.
#[test]
fn truncate_then_reappend_survives_reopen() {
    enable_logging();
    let dir = TempDir::new().unwrap();
    {
        let repo = Fs::new(dir.path()).unwrap();
        let mut log = Log::create(repo, options(4096)).unwrap();
        for i in 1..=5u64 {
            log.append(&entry(i, 1)).unwrap();
        }

        log.truncate(3).unwrap();
        assert_eq!(log.last_index(), 3);
        log.append(&entry(4, 2)).unwrap();
        log.append(&entry(5, 2)).unwrap();
        assert_eq!(log.get(4).unwrap().unwrap().term, 2);
        log.close().unwrap();
    }

    let repo = Fs::new(dir.path()).unwrap();
    let mut reopened = Log::open(repo, options(4096)).unwrap();
    assert_eq!(reopened.last_index(), 5);
    assert_eq!(reopened.get(4).unwrap().unwrap().term, 2);
    assert_eq!(reopened.get(5).unwrap().unwrap().term, 2);
}

/// Truncating at or beyond `last_index` is a no-op.
#[test]
fn truncate_past_end_is_noop() {
    let dir = TempDir::new().unwrap();
    let repo = Fs::new(dir.path()).unwrap();
    let mut log = Log::create(repo, options(4096)).unwrap();
    for i in 1..=3u64 {
        log.append(&entry(i, 1)).unwrap();
    }
    log.truncate(3).unwrap();
    log.truncate(100).unwrap();
    assert_eq!(log.last_index(), 3);
}

/// A truncation point inside an already-sealed (non-tail) segment drops
/// every later segment and makes the truncated one writable again.
#[test]
fn truncate_into_sealed_segment_reopens_it_as_tail() {
    enable_logging();
    let dir = TempDir::new().unwrap();
    let repo = Fs::new(dir.path()).unwrap();
    let mut log = Log::create(repo, options(64)).unwrap();

    for i in 1..=20u64 {
        log.append(&entry(i, 1)).unwrap();
    }
    let rolled = log.last_index();
    assert!(rolled >= 20);

    log.truncate(5).unwrap();
    assert_eq!(log.last_index(), 5);
    log.append(&entry(6, 2)).unwrap();
    assert_eq!(log.get(6).unwrap().unwrap().term, 2);
    assert!(log.get(10).is_err());
}

#[test]
fn contains_entry_reflects_truncation() {
    let dir = TempDir::new().unwrap();
    let repo = Fs::new(dir.path()).unwrap();
    let mut log = Log::create(repo, options(4096)).unwrap();
    for i in 1..=4u64 {
        log.append(&entry(i, 1)).unwrap();
    }
    assert!(log.contains_entry(3));
    log.truncate(2).unwrap();
    assert!(!log.contains_entry(3));
    assert!(log.contains_entry(2));
}
