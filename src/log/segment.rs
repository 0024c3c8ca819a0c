use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use super::config::Config;
use super::index::{Index, ENT_WIDTH};
use super::store::Store;
use crate::error::{LogError, Result};

pub const STORE_EXT: &str = "store";
pub const INDEX_EXT: &str = "index";

/// A payload together with the offset it was appended at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub value: Vec<u8>,
    pub offset: u64,
}

/// Point-in-time description of one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentInfo {
    pub base_offset: u64,
    pub next_offset: u64,
    pub store_bytes: u64,
    pub index_bytes: u64,
}

// Files are keyed by base offset, zero padded so they sort by name too
pub fn store_path(dir: &Path, base_offset: u64) -> PathBuf {
    dir.join(format!("{:020}.{}", base_offset, STORE_EXT))
}

pub fn index_path(dir: &Path, base_offset: u64) -> PathBuf {
    dir.join(format!("{:020}.{}", base_offset, INDEX_EXT))
}

fn poisoned<T>(err: PoisonError<T>) -> LogError {
    LogError::LockPoisoned(err.to_string())
}

/// One store and its index, covering offsets `[base_offset, next_offset)`.
pub struct Segment {
    store: Mutex<Store>,
    index: Index,
    base_offset: u64,
    next_offset: u64,
    config: Config,
}

impl Segment {
    /// Opens the segment starting at `base_offset` in `dir`, creating its
    /// files if needed. Existing files are reconciled so appends resume
    /// right after the last complete record.
    pub fn new(dir: &Path, base_offset: u64, config: Config) -> Result<Segment> {
        let store_path = store_path(dir, base_offset);
        let store_file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(&store_path)?;
        let mut store = Store::new(store_file, store_path)?;

        let index_path = index_path(dir, base_offset);
        let index_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&index_path)?;
        let mut index = Index::new(index_file, index_path, config.segment.max_index_bytes)?;

        let records = recover(&mut store, &mut index)?;
        debug!(base_offset, records, store_bytes = store.size(), "opened segment");

        Ok(Segment {
            store: Mutex::new(store),
            index,
            base_offset,
            next_offset: base_offset + records,
            config,
        })
    }

    fn lock_store(&self) -> Result<MutexGuard<'_, Store>> {
        self.store.lock().map_err(poisoned)
    }

    /// Appends `value` and returns its absolute offset.
    pub fn append(&mut self, value: &[u8]) -> Result<u64> {
        let cur = self.next_offset;
        let rel = u32::try_from(cur - self.base_offset).map_err(|_| LogError::OutOfRange(cur))?;
        // Refuse before touching the store so it never holds an unindexed record
        if !self.index.has_room() {
            return Err(LogError::OutOfRange(cur));
        }

        let (pos, _) = self.store.get_mut().map_err(poisoned)?.append(value)?;
        self.index.append(rel, pos)?;
        self.next_offset += 1;
        Ok(cur)
    }

    pub fn read(&self, offset: u64) -> Result<Record> {
        if !self.contains(offset) {
            return Err(LogError::OutOfRange(offset));
        }
        let rel = u32::try_from(offset - self.base_offset).map_err(|_| LogError::OutOfRange(offset))?;
        let pos = self.index.read(rel)?;
        let value = self.lock_store()?.read(pos)?;
        Ok(Record { value, offset })
    }

    /// True once either file reached its threshold, or the index has no
    /// room for another entry.
    pub fn is_maxed(&self) -> bool {
        self.store_size() >= self.config.segment.max_store_bytes
            || self.index.size() + ENT_WIDTH > self.config.segment.max_index_bytes
            || !self.index.has_room()
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.base_offset && offset < self.next_offset
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn next_offset(&self) -> u64 {
        self.next_offset
    }

    pub fn is_empty(&self) -> bool {
        self.next_offset == self.base_offset
    }

    // Size is only written under &mut self, so a poisoned guard still holds it
    fn store_size(&self) -> u64 {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .size()
    }

    pub fn store_path(&self) -> PathBuf {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .path()
            .to_path_buf()
    }

    pub fn info(&self) -> SegmentInfo {
        SegmentInfo {
            base_offset: self.base_offset,
            next_offset: self.next_offset,
            store_bytes: self.store_size(),
            index_bytes: self.index.size(),
        }
    }

    /// Closes both files and deletes them.
    pub fn remove(self) -> Result<()> {
        let store_path = self.store_path();
        let index_path = self.index.path().to_path_buf();
        self.close()?;
        let store = fs::remove_file(&store_path);
        fs::remove_file(&index_path)?;
        Ok(store?)
    }

    pub fn close(self) -> Result<()> {
        let base_offset = self.base_offset;
        self.store.into_inner().map_err(poisoned)?.close()?;
        self.index.close()?;
        debug!(base_offset, "closed segment");
        Ok(())
    }
}

// Returns the number of complete records, rebuilding the index from the
// store when the two disagree.
fn recover(store: &mut Store, index: &mut Index) -> Result<u64> {
    let entries = index.len();

    if store.size() == 0 {
        // A lone zero entry over an empty store is preallocated space
        if entries <= 1 && index.last().map_or(true, |e| e == (0, 0)) {
            index.truncate_entries(0);
            return Ok(0);
        }
        return Err(LogError::CorruptData(format!(
            "{}: {} index entries but the store is empty",
            index.path().display(),
            entries
        )));
    }

    // Fast path: the last entry is the last record in the store
    if let Some((off, pos)) = index.last() {
        if u64::from(off) + 1 == entries && matches!(store.record_end(pos), Ok(end) if end == store.size()) {
            return Ok(entries);
        }
    }

    let positions = store.scan()?;
    let records = positions.len() as u64;
    if entries > records {
        return Err(LogError::CorruptData(format!(
            "{}: {} index entries but the store holds {} records",
            index.path().display(),
            entries,
            records
        )));
    }

    warn!(
        index = %index.path().display(),
        entries,
        records,
        "index disagrees with store, rebuilding"
    );
    index.rebuild(&positions)?;
    Ok(records)
}
