use byteorder::{BigEndian, ByteOrder};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{LogError, Result};

/// Width of the big-endian length prefix in front of every record.
pub const LEN_WIDTH: u64 = 8;

// Append-only file of `[len: u64 BE][payload]` frames.
// Segments keep it behind a mutex since reads move the file cursor.
pub struct Store {
    file: File,
    path: PathBuf,
    buf: BufWriter<File>,
    size: u64,
}

impl Store {
    /// Opens (or creates) the store file at `path` in append mode.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Self::new(file, path.as_ref())
    }

    /// Wraps an already opened file. The file must be readable and opened
    /// in append mode.
    pub fn new(file: File, path: impl Into<PathBuf>) -> Result<Self> {
        let size = file.metadata()?.len();
        let writer = BufWriter::new(file.try_clone()?);
        Ok(Store {
            file,
            path: path.into(),
            buf: writer,
            size,
        })
    }

    // Append a slice of bytes to the store, returning the position of its
    // length prefix and the number of bytes written
    pub fn append(&mut self, p: &[u8]) -> Result<(u64, u64)> {
        let pos = self.size;

        if let Err(e) = self.write_frame(p) {
            if let Err(reset) = self.discard_from(pos) {
                warn!(path = %self.path.display(), pos, "failed to roll back partial append: {}", reset);
            }
            return Err(e.into());
        }

        let written = p.len() as u64 + LEN_WIDTH;
        self.size += written;
        Ok((pos, written))
    }

    fn write_frame(&mut self, p: &[u8]) -> io::Result<()> {
        let mut len_buf = [0u8; LEN_WIDTH as usize];
        BigEndian::write_u64(&mut len_buf, p.len() as u64);
        self.buf.write_all(&len_buf)?;
        self.buf.write_all(p)?;

        // In-memory buffer to the page cache, then page cache to disk
        self.buf.flush()?;
        self.file.sync_all()
    }

    // Drops whatever a failed append left buffered or on disk past `pos`,
    // then takes the size from the file so the next position is real.
    fn discard_from(&mut self, pos: u64) -> Result<()> {
        let fresh = BufWriter::new(self.file.try_clone()?);
        // into_parts hands back unflushed bytes instead of writing them
        let _ = std::mem::replace(&mut self.buf, fresh).into_parts();
        let truncated = self.file.set_len(pos);
        self.size = self.file.metadata()?.len();
        truncated?;
        Ok(())
    }

    /// Reads the record whose length prefix starts at `pos`.
    pub fn read(&mut self, pos: u64) -> Result<Vec<u8>> {
        let end = self.record_end(pos)?;

        let mut b = vec![0u8; (end - pos - LEN_WIDTH) as usize];
        self.file.seek(SeekFrom::Start(pos + LEN_WIDTH))?;
        self.file.read_exact(&mut b)?;
        Ok(b)
    }

    // Reads len(p) bytes into p, beginning at `off` in the store file
    pub fn read_at(&mut self, p: &mut [u8], off: u64) -> Result<usize> {
        if off.saturating_add(p.len() as u64) > self.size {
            return Err(LogError::OutOfRange(off));
        }
        self.buf.flush()?;
        self.file.seek(SeekFrom::Start(off))?;
        self.file.read_exact(p)?;
        Ok(p.len())
    }

    /// Byte position just past the record starting at `pos`.
    pub fn record_end(&mut self, pos: u64) -> Result<u64> {
        if pos >= self.size {
            return Err(LogError::OutOfRange(pos));
        }
        if pos + LEN_WIDTH > self.size {
            return Err(LogError::CorruptData(format!(
                "{}: length prefix at {} cut off by end of file ({} bytes)",
                self.path.display(),
                pos,
                self.size
            )));
        }

        self.buf.flush()?;
        let mut len_buf = [0u8; LEN_WIDTH as usize];
        self.file.seek(SeekFrom::Start(pos))?;
        self.file.read_exact(&mut len_buf)?;
        let len = BigEndian::read_u64(&len_buf);

        match (pos + LEN_WIDTH).checked_add(len) {
            Some(end) if end <= self.size => Ok(end),
            _ => Err(LogError::CorruptData(format!(
                "{}: record at {} claims {} bytes but file ends at {}",
                self.path.display(),
                pos,
                len,
                self.size
            ))),
        }
    }

    /// Walks every frame from the start of the file and returns the
    /// position of each complete record. A torn frame at the tail is
    /// reported as corruption.
    pub fn scan(&mut self) -> Result<Vec<u64>> {
        self.buf.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&self.file);

        let mut positions = Vec::new();
        let mut pos = 0u64;
        let mut len_buf = [0u8; LEN_WIDTH as usize];
        while pos < self.size {
            if self.size - pos < LEN_WIDTH {
                return Err(LogError::CorruptData(format!(
                    "{}: {} trailing bytes at {} do not form a length prefix",
                    self.path.display(),
                    self.size - pos,
                    pos
                )));
            }
            reader.read_exact(&mut len_buf)?;
            let len = BigEndian::read_u64(&len_buf);
            let end = match (pos + LEN_WIDTH).checked_add(len) {
                Some(end) if end <= self.size => end,
                _ => {
                    return Err(LogError::CorruptData(format!(
                        "{}: record at {} claims {} bytes but file ends at {}",
                        self.path.display(),
                        pos,
                        len,
                        self.size
                    )))
                }
            };
            reader.seek_relative(len as i64)?;
            positions.push(pos);
            pos = end;
        }
        Ok(positions)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flushes buffered bytes to disk and releases the file.
    pub fn close(mut self) -> Result<()> {
        self.buf.flush()?;
        self.file.sync_all()?;
        debug!(path = %self.path.display(), size = self.size, "closed store");
        Ok(())
    }
}
