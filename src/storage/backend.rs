//! Backend trait - the downstream storage the write-back layer forwards to.

use std::fmt;
use std::ops::BitOr;

use async_trait::async_trait;
use bytes::Bytes;

use crate::common::{BackendResult, FileHandle};

/// Flags for [`Backend::open`].
///
/// A small bitset; combine with `|`.
///
/// # Example
/// ```
/// use writeback::storage::OpenFlags;
///
/// let flags = OpenFlags::READ | OpenFlags::WRITE;
/// assert!(flags.contains(OpenFlags::WRITE));
/// assert!(!flags.contains(OpenFlags::TRUNCATE));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpenFlags(pub u32);

impl OpenFlags {
    pub const READ: OpenFlags = OpenFlags(1 << 0);
    pub const WRITE: OpenFlags = OpenFlags(1 << 1);
    pub const APPEND: OpenFlags = OpenFlags(1 << 2);
    pub const TRUNCATE: OpenFlags = OpenFlags(1 << 3);
    pub const CREATE: OpenFlags = OpenFlags(1 << 4);

    /// Read + write, the usual flags for a file that is being written.
    pub const READ_WRITE: OpenFlags = OpenFlags(Self::READ.0 | Self::WRITE.0);

    #[inline]
    pub fn contains(self, other: OpenFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for OpenFlags {
    type Output = OpenFlags;

    fn bitor(self, rhs: OpenFlags) -> OpenFlags {
        OpenFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for OpenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::READ, "READ"),
            (Self::WRITE, "WRITE"),
            (Self::APPEND, "APPEND"),
            (Self::TRUNCATE, "TRUNCATE"),
            (Self::CREATE, "CREATE"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            write!(f, "(none)")
        } else {
            write!(f, "{}", set.join("|"))
        }
    }
}

/// Downstream storage operations.
///
/// Every operation is asynchronous and completes with either its
/// kind-specific payload or a [`BackendError`](crate::BackendError).
/// Implementations must not block the executor; a slow operation only
/// suspends the caller's own task.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    async fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> BackendResult<FileHandle>;

    async fn create(&self, path: &str, mode: u32) -> BackendResult<FileHandle>;

    /// Write `data` at `offset`. Returns the number of bytes written.
    async fn write(&self, handle: FileHandle, data: Bytes, offset: u64) -> BackendResult<usize>;

    /// Read up to `size` bytes at `offset`. A short read means end of file.
    async fn read(&self, handle: FileHandle, size: usize, offset: u64) -> BackendResult<Bytes>;

    async fn flush(&self, handle: FileHandle) -> BackendResult<()>;

    /// Sync to stable storage; `datasync` skips metadata.
    async fn fsync(&self, handle: FileHandle, datasync: bool) -> BackendResult<()>;

    /// Last close of the handle. The handle is invalid afterwards.
    async fn release(&self, handle: FileHandle) -> BackendResult<()>;
}
