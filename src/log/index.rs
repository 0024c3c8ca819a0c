use byteorder::{BigEndian, ByteOrder};
use memmap2::MmapMut;
use std::fs::{File, OpenOptions};
use std::io::{Error, ErrorKind};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{LogError, Result};

pub const OFF_WIDTH: u64 = 4;
pub const POS_WIDTH: u64 = 8;
/// Width of one `[relative offset: u32 BE][position: u64 BE]` entry.
pub const ENT_WIDTH: u64 = OFF_WIDTH + POS_WIDTH;

// Memory-mapped table of fixed-width entries. The file is grown to its
// capacity while open and cut back to the written size on close.
pub struct Index {
    file: File,
    path: PathBuf,
    mmap: MmapMut,
    size: u64,
}

impl Index {
    pub fn open(path: impl AsRef<Path>, max_index_bytes: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;
        Self::new(file, path.as_ref(), max_index_bytes)
    }

    pub fn new(file: File, path: impl Into<PathBuf>, max_index_bytes: u64) -> Result<Self> {
        let len = file.metadata()?.len();
        file.set_len(len.max(max_index_bytes))?;
        // SAFETY: the file stays open for the lifetime of the map and is
        // only resized through this Index, after the map is dropped.
        let mmap = unsafe { MmapMut::map_mut(&file)? };

        let mut index = Index {
            file,
            path: path.into(),
            mmap,
            size: 0,
        };

        // A file left at full capacity by a crash has zeroed slots after
        // the last real entry. Slot 0 is legitimately (0, 0), so it is
        // left for the segment to judge against its store.
        let mut entries = len / ENT_WIDTH;
        while entries > 1 && index.entry(entries - 1) == (0, 0) {
            entries -= 1;
        }
        index.size = entries * ENT_WIDTH;
        Ok(index)
    }

    fn entry(&self, slot: u64) -> (u32, u64) {
        let at = (slot * ENT_WIDTH) as usize;
        let off = BigEndian::read_u32(&self.mmap[at..at + OFF_WIDTH as usize]);
        let pos = BigEndian::read_u64(&self.mmap[at + OFF_WIDTH as usize..at + ENT_WIDTH as usize]);
        (off, pos)
    }

    /// Position in the store of the record with relative offset `off`.
    pub fn read(&self, off: u32) -> Result<u64> {
        if u64::from(off) >= self.len() {
            return Err(LogError::NotFound(off));
        }
        let (stored, pos) = self.entry(u64::from(off));
        if stored != off {
            return Err(LogError::CorruptData(format!(
                "{}: slot {} holds relative offset {}",
                self.path.display(),
                off,
                stored
            )));
        }
        Ok(pos)
    }

    pub fn last(&self) -> Option<(u32, u64)> {
        match self.len() {
            0 => None,
            n => Some(self.entry(n - 1)),
        }
    }

    /// Writes the next entry. Offsets must be strictly increasing; the
    /// owning segment is the only writer, so a violation is a bug.
    pub fn append(&mut self, off: u32, pos: u64) -> Result<()> {
        if let Some((last, _)) = self.last() {
            assert!(
                off > last,
                "index offsets must increase: {} after {}",
                off,
                last
            );
        }
        if !self.has_room() {
            return Err(Error::new(ErrorKind::UnexpectedEof, "index is full").into());
        }

        let at = self.size as usize;
        BigEndian::write_u32(&mut self.mmap[at..at + OFF_WIDTH as usize], off);
        BigEndian::write_u64(&mut self.mmap[at + OFF_WIDTH as usize..at + ENT_WIDTH as usize], pos);
        self.size += ENT_WIDTH;
        Ok(())
    }

    /// Whether one more entry fits in the mapped capacity.
    pub fn has_room(&self) -> bool {
        self.size + ENT_WIDTH <= self.mmap.len() as u64
    }

    /// Drops every entry from slot `entries` on and zeroes the freed space.
    pub fn truncate_entries(&mut self, entries: u64) {
        let size = (entries * ENT_WIDTH).min(self.size);
        self.mmap[size as usize..].fill(0);
        self.size = size;
    }

    /// Replaces the whole table with one entry per store position.
    pub fn rebuild(&mut self, positions: &[u64]) -> Result<()> {
        let needed = positions.len() as u64 * ENT_WIDTH;
        if needed > self.mmap.len() as u64 {
            self.mmap.flush()?;
            self.file.set_len(needed)?;
            // SAFETY: see Index::new; the previous map is replaced here.
            self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        }

        self.size = 0;
        self.mmap.fill(0);
        for (off, &pos) in positions.iter().enumerate() {
            let off = u32::try_from(off).map_err(|_| {
                LogError::CorruptData(format!(
                    "{}: {} records do not fit 32-bit relative offsets",
                    self.path.display(),
                    positions.len()
                ))
            })?;
            self.append(off, pos)?;
        }
        self.mmap.flush()?;
        Ok(())
    }

    /// Number of entries written.
    pub fn len(&self) -> u64 {
        self.size / ENT_WIDTH
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Bytes of written entries (not the mapped capacity).
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Syncs the map and cuts the file back to the written entries.
    pub fn close(self) -> Result<()> {
        let Index {
            file,
            path,
            mmap,
            size,
        } = self;
        mmap.flush()?;
        drop(mmap);
        file.set_len(size)?;
        file.sync_all()?;
        debug!(path = %path.display(), size, "closed index");
        Ok(())
    }
}
