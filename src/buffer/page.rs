//! Page - one buffered write.
//!
//! A [`Page`] owns a copy of the bytes a caller handed to `write`/`writev`,
//! together with the file offset they belong at. The caller's buffers are
//! only borrowed for the duration of the call, so the copy is taken before
//! the write is acknowledged.

use bytes::{Bytes, BytesMut};

/// A buffered write: file offset plus owned payload.
///
/// Immutable after creation. Dropped when a flush drains it.
///
/// # Example
/// ```
/// use writeback::buffer::Page;
///
/// let page = Page::copy_from(100, &[b"hello ", b"world"]);
/// assert_eq!(page.offset(), 100);
/// assert_eq!(page.len(), 11);
/// assert_eq!(page.end(), 111);
/// assert_eq!(page.as_slice(), b"hello world");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    offset: u64,
    data: Bytes,
}

impl Page {
    /// Copy a vector of caller buffers into one owned page at `offset`.
    pub fn copy_from(offset: u64, bufs: &[&[u8]]) -> Self {
        let data = match bufs {
            [single] => Bytes::copy_from_slice(single),
            _ => {
                let total = bufs.iter().map(|b| b.len()).sum();
                let mut data = BytesMut::with_capacity(total);
                for buf in bufs {
                    data.extend_from_slice(buf);
                }
                data.freeze()
            }
        };

        Self { offset, data }
    }

    /// Byte position of the first byte in the file.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Payload length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Offset one past the last byte; where a contiguous successor starts.
    #[inline]
    pub fn end(&self) -> u64 {
        self.offset + self.data.len() as u64
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Hand the payload over without copying.
    #[inline]
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}
