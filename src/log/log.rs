use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{error, info, warn};

use super::config::Config;
use super::segment::{Record, Segment, SegmentInfo, STORE_EXT};
use crate::error::{LogError, Result};

// Entry point for writing to the log and reading it back. Appends,
// rotation and truncation take the write lock; reads share the read lock.
pub struct Log {
    dir: PathBuf,
    config: Config,
    inner: RwLock<Inner>,
}

pub type SafeLog = Arc<Log>;

// Ordered by base offset; the last segment is the active one
struct Inner {
    segments: Vec<Segment>,
    closed: bool,
}

impl Inner {
    fn active_mut(&mut self) -> Result<&mut Segment> {
        self.segments.last_mut().ok_or(LogError::Closed)
    }
}

fn poisoned<T>(err: PoisonError<T>) -> LogError {
    LogError::LockPoisoned(err.to_string())
}

// Base offsets of the segments already on disk, sorted
fn setup_log(dir: &Path) -> Result<Vec<u64>> {
    let mut base_offsets: Vec<u64> = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(STORE_EXT) {
            continue;
        }
        if let Some(offset) = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| u64::from_str(stem).ok())
        {
            base_offsets.push(offset);
        }
    }

    base_offsets.sort_unstable();
    Ok(base_offsets)
}

fn load_segments(dir: &Path, config: &Config) -> Result<Vec<Segment>> {
    let mut segments: Vec<Segment> = Vec::new();

    for offset in setup_log(dir)? {
        let segment = Segment::new(dir, offset, config.clone())?;
        if let Some(prev) = segments.last() {
            if prev.next_offset() != segment.base_offset() {
                return Err(LogError::CorruptData(format!(
                    "segment {} ends at {} but the next segment starts at {}",
                    prev.base_offset(),
                    prev.next_offset(),
                    segment.base_offset()
                )));
            }
        }
        segments.push(segment);
    }

    let next_base = match segments.last() {
        None => Some(config.segment.initial_offset),
        Some(last) if last.is_maxed() => Some(last.next_offset()),
        Some(_) => None,
    };
    if let Some(base_offset) = next_base {
        segments.push(Segment::new(dir, base_offset, config.clone())?);
    }

    Ok(segments)
}

impl Log {
    /// Opens the log stored in `dir`, creating the directory and the first
    /// segment if needed.
    pub fn new(dir: impl Into<PathBuf>, config: Config) -> Result<Log> {
        config.validate()?;
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let segments = load_segments(&dir, &config)?;
        info!(
            dir = %dir.display(),
            segments = segments.len(),
            lowest = segments.first().map(Segment::base_offset),
            highest = segments.last().map(Segment::next_offset),
            "opened log"
        );

        Ok(Log {
            dir,
            config,
            inner: RwLock::new(Inner {
                segments,
                closed: false,
            }),
        })
    }

    fn read_inner(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        let inner = self.inner.read().map_err(poisoned)?;
        if inner.closed {
            return Err(LogError::Closed);
        }
        Ok(inner)
    }

    fn write_inner(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        let inner = self.inner.write().map_err(poisoned)?;
        if inner.closed {
            return Err(LogError::Closed);
        }
        Ok(inner)
    }

    fn rotate(&self, inner: &mut Inner) -> Result<()> {
        let base_offset = inner.active_mut()?.next_offset();
        let segment = Segment::new(&self.dir, base_offset, self.config.clone())?;
        inner.segments.push(segment);
        info!(base_offset, segments = inner.segments.len(), "rotated to new segment");
        Ok(())
    }

    /// Appends `value` and returns the offset assigned to it.
    pub fn append(&self, value: &[u8]) -> Result<u64> {
        let mut inner = self.write_inner()?;

        // Only left maxed when an earlier rotation failed
        if inner.active_mut()?.is_maxed() {
            self.rotate(&mut inner)?;
        }

        let active = inner.active_mut()?;
        let offset = active.append(value)?;

        if active.is_maxed() {
            // The record is durable; a failed rotation is retried by the next append
            if let Err(e) = self.rotate(&mut inner) {
                error!(offset, "failed to rotate segment: {}", e);
            }
        }
        Ok(offset)
    }

    pub fn read(&self, offset: u64) -> Result<Record> {
        let inner = self.read_inner()?;
        let idx = inner
            .segments
            .partition_point(|segment| segment.base_offset() <= offset);
        if idx == 0 {
            return Err(LogError::OutOfRange(offset));
        }
        inner.segments[idx - 1].read(offset)
    }

    /// Offset of the oldest record still held.
    pub fn lowest_offset(&self) -> Result<u64> {
        let inner = self.read_inner()?;
        inner
            .segments
            .first()
            .map(Segment::base_offset)
            .ok_or(LogError::Closed)
    }

    /// Offset the next append will receive; readable offsets are
    /// `lowest_offset()..highest_offset()`.
    pub fn highest_offset(&self) -> Result<u64> {
        let inner = self.read_inner()?;
        inner
            .segments
            .last()
            .map(Segment::next_offset)
            .ok_or(LogError::Closed)
    }

    /// Removes every segment whose records all sit below `lowest`.
    pub fn truncate(&self, lowest: u64) -> Result<()> {
        let mut inner = self.write_inner()?;
        let end = inner.active_mut()?.next_offset();
        let expired = |segment: &Segment| !segment.is_empty() && segment.next_offset() <= lowest;

        // Keep the log writable; offsets continue from where they were.
        // Created before the list changes so a failure leaves it intact.
        let replacement = if inner.segments.iter().all(expired) {
            Some(Segment::new(&self.dir, end, self.config.clone())?)
        } else {
            None
        };

        let (removed, kept): (Vec<Segment>, Vec<Segment>) =
            inner.segments.drain(..).partition(|segment| expired(segment));
        inner.segments = kept;
        inner.segments.extend(replacement);

        // Every segment is already out of the list, so try them all
        let count = removed.len();
        let mut failed = None;
        for segment in removed {
            let base_offset = segment.base_offset();
            if let Err(e) = segment.remove() {
                warn!(base_offset, "failed to remove segment: {}", e);
                failed.get_or_insert(e);
            }
        }
        if let Some(e) = failed {
            return Err(e);
        }

        if count > 0 {
            info!(lowest, removed = count, "truncated log");
        }
        Ok(())
    }

    /// Raw store bytes of every segment, oldest first, as of this call.
    pub fn reader(&self) -> Result<LogReader> {
        let inner = self.read_inner()?;
        let mut stores = VecDeque::with_capacity(inner.segments.len());
        for segment in &inner.segments {
            let info = segment.info();
            let file = File::open(segment.store_path())?;
            stores.push_back(file.take(info.store_bytes));
        }
        Ok(LogReader { stores })
    }

    pub fn segments(&self) -> Result<Vec<SegmentInfo>> {
        let inner = self.read_inner()?;
        Ok(inner.segments.iter().map(Segment::info).collect())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Closes every segment without deleting anything. Further calls fail
    /// with `LogError::Closed`.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        for segment in inner.segments.drain(..) {
            segment.close()?;
        }
        info!(dir = %self.dir.display(), "closed log");
        Ok(())
    }

    /// Closes the log and deletes its directory.
    pub fn remove(&self) -> Result<()> {
        self.close()?;
        fs::remove_dir_all(&self.dir)?;
        Ok(())
    }

    /// Deletes every segment and starts over at the configured initial offset.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.write_inner()?;
        for segment in inner.segments.drain(..) {
            segment.remove()?;
        }
        let base_offset = self.config.segment.initial_offset;
        inner
            .segments
            .push(Segment::new(&self.dir, base_offset, self.config.clone())?);
        info!(dir = %self.dir.display(), base_offset, "reset log");
        Ok(())
    }
}

impl Drop for Log {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(_) => return,
        };
        if inner.closed {
            return;
        }
        inner.closed = true;
        for segment in inner.segments.drain(..) {
            let base_offset = segment.base_offset();
            if let Err(e) = segment.close() {
                warn!(base_offset, "failed to close segment on drop: {}", e);
            }
        }
    }
}

/// Sequential reader over the raw store files of a log.
pub struct LogReader {
    stores: VecDeque<io::Take<File>>,
}

impl Read for LogReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while let Some(store) = self.stores.front_mut() {
            let n = store.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            self.stores.pop_front();
        }
        Ok(0)
    }
}
