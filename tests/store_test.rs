use std::fs::OpenOptions;
use std::io::Write;
use tempfile::tempdir;

use seglog::log::store::{Store, LEN_WIDTH};
use seglog::LogError;

const WRITE: &[u8] = b"hello world";
const WIDTH: u64 = WRITE.len() as u64 + LEN_WIDTH;

#[test]
fn test_store_append_read() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test-append-read.store");
    let mut store = Store::open(&path).unwrap();

    for i in 1..4u64 {
        let (pos, n) = store.append(WRITE).unwrap();
        assert_eq!(n, WIDTH);
        assert_eq!(pos + n, WIDTH * i, "Position {} should follow the previous record", i);
    }
    assert_eq!(store.size(), WIDTH * 3);

    for i in 0..3u64 {
        let read = store.read(WIDTH * i).unwrap();
        assert_eq!(read, WRITE);
    }

    // Reopening picks up the existing size
    store.close().unwrap();
    let mut store = Store::open(&path).unwrap();
    assert_eq!(store.size(), WIDTH * 3);
    assert_eq!(store.read(WIDTH).unwrap(), WRITE);
}

#[test]
fn test_store_read_at() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path().join("test-read-at.store")).unwrap();
    store.append(WRITE).unwrap();

    let mut len = [0u8; LEN_WIDTH as usize];
    assert_eq!(store.read_at(&mut len, 0).unwrap(), LEN_WIDTH as usize);
    assert_eq!(u64::from_be_bytes(len), WRITE.len() as u64);

    let mut payload = vec![0u8; WRITE.len()];
    store.read_at(&mut payload, LEN_WIDTH).unwrap();
    assert_eq!(payload, WRITE);

    let mut past_end = [0u8; 4];
    assert!(matches!(
        store.read_at(&mut past_end, WIDTH - 2),
        Err(LogError::OutOfRange(_))
    ));
}

#[test]
fn test_store_read_out_of_range() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path().join("test-range.store")).unwrap();

    assert!(matches!(store.read(0), Err(LogError::OutOfRange(0))));
    store.append(WRITE).unwrap();
    assert!(matches!(store.read(WIDTH), Err(LogError::OutOfRange(_))));
}

#[test]
fn test_store_empty_payload() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path().join("test-empty.store")).unwrap();

    let (pos, n) = store.append(b"").unwrap();
    assert_eq!((pos, n), (0, LEN_WIDTH));
    assert!(store.read(0).unwrap().is_empty());
}

#[test]
fn test_store_torn_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test-torn.store");
    {
        let mut store = Store::open(&path).unwrap();
        store.append(WRITE).unwrap();
        store.close().unwrap();
    }

    // Length prefix promising 100 bytes followed by only 3
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&100u64.to_be_bytes()).unwrap();
    file.write_all(b"abc").unwrap();
    drop(file);

    let mut store = Store::open(&path).unwrap();
    assert_eq!(store.read(0).unwrap(), WRITE);
    assert!(matches!(store.read(WIDTH), Err(LogError::CorruptData(_))));
    assert!(matches!(store.scan(), Err(LogError::CorruptData(_))));
}

#[test]
fn test_store_scan() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path().join("test-scan.store")).unwrap();
    assert!(store.scan().unwrap().is_empty());

    store.append(b"a").unwrap();
    store.append(b"bcd").unwrap();
    store.append(b"").unwrap();

    assert_eq!(store.scan().unwrap(), vec![0, 9, 20]);
    assert_eq!(store.record_end(9).unwrap(), 20);
}

#[test]
fn test_store_failed_append_leaves_store_usable() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test-failed-append.store");
    {
        let mut store = Store::open(&path).unwrap();
        store.append(WRITE).unwrap();
        store.close().unwrap();
    }

    // A read-only handle makes every write fail
    let file = OpenOptions::new().read(true).open(&path).unwrap();
    let mut store = Store::new(file, &path).unwrap();

    assert!(matches!(store.append(b"lost"), Err(LogError::Io(_))));
    assert_eq!(store.size(), WIDTH, "Size should match the file after a failed append");

    // Nothing from the failed append is left buffered to be flushed later
    assert_eq!(store.read(0).unwrap(), WRITE);
    assert!(matches!(store.append(b"lost again"), Err(LogError::Io(_))));
    assert_eq!(store.size(), WIDTH);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), WIDTH);
}
