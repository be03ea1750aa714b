//! Backend file handle type.

use std::fmt;

/// Identifies an open file on the backend.
///
/// The backend hands one out from a successful open/create and every later
/// operation on that file is addressed with it. The write-back layer keys its
/// session registry on this value; it never interprets it.
///
/// # Example
/// ```
/// use writeback::FileHandle;
///
/// let handle = FileHandle::new(42);
/// assert_eq!(handle.0, 42);
/// assert_eq!(handle.to_string(), "Handle(42)");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileHandle(pub u64);

impl FileHandle {
    #[inline]
    pub fn new(id: u64) -> Self {
        FileHandle(id)
    }
}

impl fmt::Display for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({})", self.0)
    }
}
