//! File backend - local filesystem storage under a root directory.
//!
//! The [`FileBackend`] handles all direct file operations:
//! - Opening and creating files
//! - Positioned reads and writes
//! - Flush, fsync and release

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::common::{BackendError, BackendResult, FileHandle};
use crate::storage::backend::{Backend, OpenFlags};

/// Serves files below a root directory.
///
/// # Handles
/// Every successful open/create gets a fresh [`FileHandle`] that maps to one
/// open `tokio::fs::File`. Handles are never reused.
///
/// # Thread Safety
/// The handle table is behind an `RwLock`; each open file has its own async
/// `Mutex` because a positioned write is a seek followed by a write and the
/// two must not interleave with another caller's seek.
///
/// # Positioned writes
/// Every write lands at the offset it names. [`OpenFlags::APPEND`] is
/// accepted but has no effect here; callers append by writing at the end.
///
/// # Durability
/// Writes only reach the OS page cache. `fsync` is what makes them durable.
pub struct FileBackend {
    root: PathBuf,
    files: RwLock<HashMap<FileHandle, Arc<Mutex<File>>>>,
    next_handle: AtomicU64,
}

impl FileBackend {
    /// Create a backend serving files under `root`.
    ///
    /// # Errors
    /// Returns an error if `root` is not an existing directory.
    pub fn new<P: AsRef<Path>>(root: P) -> BackendResult<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(BackendError::not_found(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        Ok(Self {
            root,
            files: RwLock::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        })
    }

    /// The directory files are resolved against.
    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of handles opened and not yet released.
    pub fn open_handles(&self) -> usize {
        self.files.read().len()
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn register(&self, file: File) -> FileHandle {
        let handle = FileHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.files.write().insert(handle, Arc::new(Mutex::new(file)));
        handle
    }

    fn file(&self, handle: FileHandle) -> BackendResult<Arc<Mutex<File>>> {
        self.files
            .read()
            .get(&handle)
            .cloned()
            .ok_or_else(|| BackendError::bad_handle(format!("{} is not open", handle)))
    }
}

#[async_trait]
impl Backend for FileBackend {
    async fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> BackendResult<FileHandle> {
        // Writes are positioned; O_APPEND would make the seek a no-op
        let mut options = OpenOptions::new();
        options
            .read(flags.contains(OpenFlags::READ))
            .write(flags.contains(OpenFlags::WRITE))
            .truncate(flags.contains(OpenFlags::TRUNCATE))
            .create(flags.contains(OpenFlags::CREATE));
        #[cfg(unix)]
        options.mode(mode);
        #[cfg(not(unix))]
        let _ = mode;

        let file = options.open(self.resolve(path)).await?;
        Ok(self.register(file))
    }

    async fn create(&self, path: &str, mode: u32) -> BackendResult<FileHandle> {
        self.open(
            path,
            OpenFlags::READ_WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE,
            mode,
        )
        .await
    }

    async fn write(&self, handle: FileHandle, data: Bytes, offset: u64) -> BackendResult<usize> {
        let file = self.file(handle)?;
        let mut file = file.lock().await;

        file.seek(SeekFrom::Start(offset)).await?;
        file.write_all(&data).await?;
        // tokio completes file writes in the background; surface the error here
        file.flush().await?;

        Ok(data.len())
    }

    async fn read(&self, handle: FileHandle, size: usize, offset: u64) -> BackendResult<Bytes> {
        let file = self.file(handle)?;
        let mut file = file.lock().await;

        file.seek(SeekFrom::Start(offset)).await?;

        // Loop until `size` bytes or EOF; a single read may come back short
        let mut buf = BytesMut::zeroed(size);
        let mut filled = 0;
        while filled < size {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);

        Ok(buf.freeze())
    }

    async fn flush(&self, handle: FileHandle) -> BackendResult<()> {
        let file = self.file(handle)?;
        let mut file = file.lock().await;
        file.flush().await?;
        Ok(())
    }

    async fn fsync(&self, handle: FileHandle, datasync: bool) -> BackendResult<()> {
        let file = self.file(handle)?;
        let mut file = file.lock().await;
        file.flush().await?;
        if datasync {
            file.sync_data().await?;
        } else {
            file.sync_all().await?;
        }
        Ok(())
    }

    async fn release(&self, handle: FileHandle) -> BackendResult<()> {
        let file = self
            .files
            .write()
            .remove(&handle)
            .ok_or_else(|| BackendError::bad_handle(format!("{} is not open", handle)))?;

        // Other holders of the Arc (in-flight calls) finish before the file closes
        let mut file = file.lock().await;
        file.flush().await?;
        Ok(())
    }
}
