use tempfile::tempdir;

use seglog::log::index::ENT_WIDTH;
use seglog::log::segment::{index_path, store_path, Segment};
use seglog::log::store::LEN_WIDTH;
use seglog::{Config, LogError};

const WRITE: &[u8] = b"hello world";

fn create_test_config(max_store_bytes: u64, max_index_bytes: u64) -> Config {
    Config::new(max_store_bytes, max_index_bytes, 0)
}

#[test]
fn test_segment_append_read() {
    let dir = tempdir().unwrap();
    let config = create_test_config(1024, ENT_WIDTH * 3);

    let mut segment = Segment::new(dir.path(), 16, config.clone()).unwrap();
    assert_eq!(segment.base_offset(), 16);
    assert_eq!(segment.next_offset(), 16);
    assert!(segment.is_empty());
    assert!(!segment.is_maxed());

    for i in 0..3u64 {
        let off = segment.append(WRITE).unwrap();
        assert_eq!(off, 16 + i, "Record {} should land at {}", i, 16 + i);

        let record = segment.read(off).unwrap();
        assert_eq!(record.value, WRITE);
        assert_eq!(record.offset, off);
    }

    // Index holds exactly three entries
    assert!(segment.is_maxed());
    assert!(matches!(segment.append(WRITE), Err(LogError::OutOfRange(19))));
    assert_eq!(segment.next_offset(), 19);
}

#[test]
fn test_segment_read_out_of_range() {
    let dir = tempdir().unwrap();
    let mut segment = Segment::new(dir.path(), 10, create_test_config(1024, 1024)).unwrap();
    segment.append(WRITE).unwrap();

    assert!(matches!(segment.read(9), Err(LogError::OutOfRange(9))));
    assert!(matches!(segment.read(11), Err(LogError::OutOfRange(11))));
    assert!(segment.contains(10));
    assert!(!segment.contains(11));
}

#[test]
fn test_segment_maxed_by_store() {
    let dir = tempdir().unwrap();
    let width = WRITE.len() as u64 + LEN_WIDTH;
    let mut segment = Segment::new(dir.path(), 0, create_test_config(width * 3, 1024)).unwrap();

    segment.append(WRITE).unwrap();
    segment.append(WRITE).unwrap();
    assert!(!segment.is_maxed());
    segment.append(WRITE).unwrap();
    assert!(segment.is_maxed());

    let info = segment.info();
    assert_eq!(info.store_bytes, width * 3);
    assert_eq!(info.index_bytes, ENT_WIDTH * 3);
}

#[test]
fn test_segment_reopen_resumes_offsets() {
    let dir = tempdir().unwrap();
    let config = create_test_config(1024, 1024);

    let mut segment = Segment::new(dir.path(), 16, config.clone()).unwrap();
    for _ in 0..3 {
        segment.append(WRITE).unwrap();
    }
    segment.close().unwrap();

    let mut segment = Segment::new(dir.path(), 16, config).unwrap();
    assert_eq!(segment.next_offset(), 19);
    assert_eq!(segment.append(b"after").unwrap(), 19);
    assert_eq!(segment.read(17).unwrap().value, WRITE);
    assert_eq!(segment.read(19).unwrap().value, b"after");
}

#[test]
fn test_segment_remove() {
    let dir = tempdir().unwrap();
    let mut segment = Segment::new(dir.path(), 5, create_test_config(1024, 1024)).unwrap();
    segment.append(WRITE).unwrap();

    assert!(store_path(dir.path(), 5).exists());
    assert!(index_path(dir.path(), 5).exists());
    segment.remove().unwrap();
    assert!(!store_path(dir.path(), 5).exists());
    assert!(!index_path(dir.path(), 5).exists());
}

#[test]
fn test_segment_file_names() {
    let dir = tempdir().unwrap();
    assert_eq!(
        store_path(dir.path(), 42).file_name().unwrap(),
        "00000000000000000042.store"
    );
    assert_eq!(
        index_path(dir.path(), 42).file_name().unwrap(),
        "00000000000000000042.index"
    );
}
