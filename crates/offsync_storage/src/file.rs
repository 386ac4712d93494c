//! File-based storage backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Open log file plus its logical length.
#[derive(Debug)]
struct Handle {
    file: File,
    len: u64,
}

impl Handle {
    fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }

    fn check_range(&self, offset: u64, len: usize) -> StorageResult<()> {
        if offset.saturating_add(len as u64) > self.len {
            return Err(StorageError::ReadPastEnd {
                offset,
                len,
                size: self.len,
            });
        }
        Ok(())
    }
}

/// Storage in a single OS file.
///
/// Bytes are durable once [`StorageBackend::sync`] returns. Compaction goes
/// through [`StorageBackend::rewrite`], which writes `<name>.rewrite` next to
/// the log, syncs it and renames it over the original.
///
/// # Example
///
/// ```no_run
/// use offsync_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut log = FileBackend::open(Path::new("data/store.log")).unwrap();
/// let offset = log.append(b"frame bytes").unwrap();
/// log.sync().unwrap();
/// assert_eq!(log.read_at(offset, 5).unwrap(), b"frame");
/// ```
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    handle: Mutex<Handle>,
}

impl FileBackend {
    /// Opens the file at `path`, creating it when missing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be opened or inspected.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            handle: Mutex::new(Handle::open(path)?),
        })
    }

    /// Like [`open`](Self::open), creating missing parent directories first.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    /// Location of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".rewrite");
        self.path.with_file_name(name)
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut handle = self.handle.lock();
        handle.check_range(offset, len)?;
        let mut buf = vec![0u8; len];
        if len > 0 {
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.read_exact(&mut buf)?;
        }
        Ok(buf)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let handle = self.handle.get_mut();
        let offset = handle.len;
        if !data.is_empty() {
            handle.file.seek(SeekFrom::Start(offset))?;
            handle.file.write_all(data)?;
            handle.len += data.len() as u64;
        }
        Ok(offset)
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(self.handle.get_mut().file.flush()?)
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.handle.lock().len)
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(self.handle.get_mut().file.sync_all()?)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let handle = self.handle.get_mut();
        if new_size > handle.len {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: handle.len,
            });
        }
        handle.file.set_len(new_size)?;
        handle.file.sync_all()?;
        handle.len = new_size;
        Ok(())
    }

    fn rewrite(&mut self, data: &[u8]) -> StorageResult<()> {
        let staging = self.staging_path();
        let mut out = File::create(&staging)?;
        out.write_all(data)?;
        out.sync_all()?;
        drop(out);

        fs::rename(&staging, &self.path)?;
        *self.handle.get_mut() = Handle::open(&self.path)?;
        Ok(())
    }
}
