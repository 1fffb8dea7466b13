//! C1 — the backing store.
//!
//! Byte-addressable read/write at absolute offsets over a regular file or
//! block device, with no caching of its own (that's [`crate::cache`]'s job).
//! Every higher layer refers to offsets in absolute disk-byte terms; the
//! store itself adds the filesystem's base offset (needed when the
//! filesystem lives inside a partition) internally, so callers never see it.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Byte-addressable storage backing one FAT filesystem.
///
/// Per spec §5's resource-ownership note, a real file descriptor is opened
/// per call and closed before `read`/`write` return, trading some syscall
/// overhead for robustness against the host renaming or replacing the
/// backing path mid-session.
pub trait BackingStore {
    /// Read `len` bytes starting at absolute disk offset `offset` (already
    /// including the filesystem's base offset).
    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

    /// Write `data` at absolute disk offset `offset`.
    fn write(&self, offset: u64, data: &[u8]) -> Result<()>;

    /// Total size of the backing container in bytes.
    fn total_size(&self) -> Result<u64>;
}

/// A regular file or block device opened read-write, with a fixed base
/// offset added to every logical access (non-zero when the filesystem lives
/// inside a partition rather than occupying the whole container).
pub struct FileBackingStore {
    path: PathBuf,
    base_offset: u64,
}

impl FileBackingStore {
    /// Open an existing path for read-write access.
    pub fn open(path: impl AsRef<Path>, base_offset: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        // Round-trip a handle once up front purely to surface "does not
        // exist" / permission errors eagerly rather than on first access.
        OpenOptions::new().read(true).write(true).open(&path)?;
        Ok(Self { path, base_offset })
    }

    /// Create (or truncate) a path of exactly `size_bytes`, used by the
    /// formatter (spec §4.10).
    pub fn create(path: impl AsRef<Path>, size_bytes: u64, base_offset: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        let current_len = file.metadata()?.len();
        if current_len < size_bytes {
            file.set_len(size_bytes)?;
        }
        Ok(Self { path, base_offset })
    }

    fn open_handle(&self) -> Result<File> {
        Ok(OpenOptions::new().read(true).write(true).open(&self.path)?)
    }

    pub fn base_offset(&self) -> u64 {
        self.base_offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BackingStore for FileBackingStore {
    fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut file = self.open_handle()?;
        let mut buf = vec![0u8; len];
        file.seek(SeekFrom::Start(self.base_offset + offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut file = self.open_handle()?;
        file.seek(SeekFrom::Start(self.base_offset + offset))?;
        file.write_all(data)?;
        Ok(())
    }

    fn total_size(&self) -> Result<u64> {
        let file = self.open_handle()?;
        Ok(file.metadata()?.len())
    }
}
