//! Flush engine - coalesces a session's run and writes it to the backend.
//!
//! ```text
//!   pages: [off 0, 4K] [off 4K, 4K] [off 8K, 2K]
//!              │            │            │
//!              └────────────┼────────────┘   take_run() under the session lock
//!                           ▼
//!   FlushBatch { offset: 0, data: 10K contiguous bytes, pages: 3 }
//!                           │
//!                           ▼                backend.write() outside the lock
//!   Ok  → counters
//!   Err → session's deferred error slot (most recent wins)
//! ```
//!
//! A flush never retries and never holds the session lock across the backend
//! call. Each issued flush carries a [`FlushTicket`], which keeps one session
//! reference and one in-flight count for exactly as long as the flush runs.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tracing::{trace, warn};

use super::session::SessionState;
use super::{Page, SessionRef, WriteBackStats};
use crate::common::BackendError;
use crate::storage::Backend;

/// Why a flush was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// A write did not continue the current run.
    Seek,
    /// The buffered byte count reached the aggregate threshold.
    Threshold,
    /// A read, flush, fsync, release or flush-all needed the run on the backend.
    SyncPoint,
}

impl fmt::Display for FlushReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlushReason::Seek => "seek",
            FlushReason::Threshold => "threshold",
            FlushReason::SyncPoint => "sync",
        };
        f.write_str(name)
    }
}

/// A drained run: one contiguous payload and where it goes.
#[derive(Debug)]
pub(crate) struct FlushBatch {
    offset: u64,
    data: Bytes,
    pages: usize,
}

impl FlushBatch {
    /// Concatenate a contiguous run of pages, in order, into one buffer.
    pub(crate) fn coalesce(pages: VecDeque<Page>, total: usize) -> Self {
        let count = pages.len();
        let offset = pages.front().map_or(0, Page::offset);

        let data = if count == 1 {
            // Single page: hand its buffer over as is
            pages.into_iter().next().map(Page::into_bytes).unwrap_or_default()
        } else {
            let mut data = BytesMut::with_capacity(total);
            for page in &pages {
                data.extend_from_slice(page.as_slice());
            }
            data.freeze()
        };
        debug_assert_eq!(data.len(), total, "buffered byte count out of sync");

        Self {
            offset,
            data,
            pages: count,
        }
    }

    #[inline]
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub(crate) fn pages(&self) -> usize {
        self.pages
    }

    #[cfg(test)]
    pub(crate) fn data(&self) -> &[u8] {
        &self.data
    }
}

/// Holds a session reference and an in-flight count for one flush.
///
/// Dropping it ends the flight (waking sync points waiting on the session)
/// and then releases the reference.
pub(crate) struct FlushTicket {
    session: SessionRef,
}

impl Drop for FlushTicket {
    fn drop(&mut self) {
        let idle = self.session.lock().end_flight();
        if idle {
            self.session.notify_idle();
        }
    }
}

/// A drained batch plus the ticket that keeps its session alive.
pub(crate) struct PendingFlush {
    batch: FlushBatch,
    ticket: FlushTicket,
}

/// Drain the session's run and register it as in flight.
///
/// Must be called inside the session's critical section; `state` is the
/// locked state of `session`. Returns `None` if nothing is buffered.
pub(crate) fn begin_flush(session: &SessionRef, state: &mut SessionState) -> Option<PendingFlush> {
    let batch = state.take_run()?;
    state.begin_flight();
    let ticket = FlushTicket {
        session: SessionRef::acquire_locked(session.session(), state),
    };
    Some(PendingFlush { batch, ticket })
}

/// Issues drained runs to the backend.
pub(crate) struct FlushEngine<B: Backend> {
    backend: Arc<B>,
    stats: Arc<WriteBackStats>,
}

impl<B: Backend> FlushEngine<B> {
    pub(crate) fn new(backend: Arc<B>, stats: Arc<WriteBackStats>) -> Self {
        Self { backend, stats }
    }

    /// Issue a flush and return without waiting for it.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn spawn(&self, flush: PendingFlush, reason: FlushReason) {
        self.stats.record_flush_issued(reason);
        let backend = Arc::clone(&self.backend);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(execute(backend, stats, flush, reason));
    }

    /// Flush the session's run and wait until nothing of it is in flight.
    ///
    /// Earlier fire-and-forget flushes land first, so an overlapping older
    /// run never overwrites the one drained here. Afterwards every
    /// acknowledged byte has reached the backend (or failed into the
    /// deferred error slot).
    pub(crate) async fn flush_now(&self, session: &SessionRef) {
        session.wait_for_flushes().await;

        let pending = {
            let mut state = session.lock();
            begin_flush(session, &mut state)
        };

        if let Some(flush) = pending {
            self.stats.record_flush_issued(FlushReason::SyncPoint);
            execute(
                Arc::clone(&self.backend),
                Arc::clone(&self.stats),
                flush,
                FlushReason::SyncPoint,
            )
            .await;
        }

        session.wait_for_flushes().await;
    }
}

/// Write one batch and settle its outcome on the session.
async fn execute<B: Backend>(
    backend: Arc<B>,
    stats: Arc<WriteBackStats>,
    flush: PendingFlush,
    reason: FlushReason,
) {
    let PendingFlush { batch, ticket } = flush;
    let handle = ticket.session.handle();
    let offset = batch.offset();
    let len = batch.len();
    let pages = batch.pages();

    trace!(handle = %handle, offset, len, pages, %reason, "flush.issue");

    let result = match backend.write(handle, batch.data, offset).await {
        Ok(written) if written == len => Ok(()),
        Ok(written) => Err(BackendError::io(format!(
            "short write: {} of {} bytes at offset {}",
            written, len, offset
        ))),
        Err(err) => Err(err),
    };

    match result {
        Ok(()) => {
            stats.backend_writes.fetch_add(1, Ordering::Relaxed);
            stats.bytes_flushed.fetch_add(len as u64, Ordering::Relaxed);
            stats.pages_flushed.fetch_add(pages as u64, Ordering::Relaxed);
            trace!(handle = %handle, offset, len, "flush.complete");
        }
        Err(err) => {
            warn!(
                handle = %handle,
                offset,
                len,
                errno = err.errno(),
                error = %err,
                "flush failed, error deferred to next sync point"
            );
            stats.deferred_errors_recorded.fetch_add(1, Ordering::Relaxed);
            ticket.session.lock().record_error(err);
        }
    }

    drop(ticket);
}
