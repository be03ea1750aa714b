//! Session - per-open-file buffering state.
//!
//! A [`Session`] holds the writes a caller has been told succeeded but that
//! have not reached the backend yet:
//! - The current run of contiguous [`Page`]s and its byte count
//! - The offset the next contiguous write must start at
//! - At most one deferred backend error
//! - A reference count controlling when the session is destroyed

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::Notify;

use crate::buffer::flush::FlushBatch;
use crate::buffer::{Page, WriteBackStats};
use crate::common::{BackendError, FileHandle};

/// Mutable session state. Only reachable through [`Session::lock`].
///
/// # Invariants
/// - `pages` is one contiguous run: each page starts where the previous ends
/// - `buffered_bytes` is the sum of the pages' lengths
/// - `refcount` reaches 0 exactly once, and `destroyed` is set then
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    /// Next offset a contiguous write must match. `None` until the first write.
    expected_offset: Option<u64>,
    buffered_bytes: usize,
    pages: VecDeque<Page>,
    deferred_error: Option<BackendError>,
    refcount: u32,
    flushes_in_flight: u32,
    /// Set by release once the handle leaves the registry. Writes that
    /// looked the session up earlier are refused from then on.
    releasing: bool,
    destroyed: bool,
}

impl SessionState {
    // ========================================================================
    // Aggregation
    // ========================================================================

    /// Whether a write at `offset` continues the current run.
    #[inline]
    pub(crate) fn is_contiguous(&self, offset: u64) -> bool {
        self.expected_offset.map_or(true, |expected| expected == offset)
    }

    /// Append a page to the run and advance the expected offset past it.
    pub(crate) fn append(&mut self, page: Page) {
        debug_assert!(
            self.pages.back().map_or(true, |last| last.end() == page.offset()),
            "appended page breaks the contiguous run"
        );

        self.expected_offset = Some(page.end());
        self.buffered_bytes += page.len();
        self.pages.push_back(page);
    }

    #[inline]
    pub(crate) fn buffered_bytes(&self) -> usize {
        self.buffered_bytes
    }

    /// Drain the whole run into one batch. `None` if nothing is buffered.
    ///
    /// Leaves `expected_offset` alone: only the write path moves it.
    pub(crate) fn take_run(&mut self) -> Option<FlushBatch> {
        if self.pages.is_empty() {
            return None;
        }

        let pages = std::mem::take(&mut self.pages);
        let total = std::mem::replace(&mut self.buffered_bytes, 0);
        Some(FlushBatch::coalesce(pages, total))
    }

    // ========================================================================
    // Deferred error slot
    // ========================================================================

    /// Store a backend failure; the most recent one wins.
    #[inline]
    pub(crate) fn record_error(&mut self, error: BackendError) {
        self.deferred_error = Some(error);
    }

    /// Read and clear the deferred error.
    #[inline]
    pub(crate) fn take_deferred_error(&mut self) -> Option<BackendError> {
        self.deferred_error.take()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Stop accepting writes. The run buffered so far still gets flushed.
    #[inline]
    pub(crate) fn mark_releasing(&mut self) {
        self.releasing = true;
    }

    #[inline]
    pub(crate) fn is_releasing(&self) -> bool {
        self.releasing
    }

    // ========================================================================
    // Reference and in-flight accounting
    // ========================================================================

    pub(crate) fn acquire(&mut self) -> u32 {
        assert!(!self.destroyed, "reference taken on a destroyed session");
        self.refcount += 1;
        self.refcount
    }

    /// Drop one reference. Returns the new count.
    ///
    /// # Panics
    /// Panics if the count is already 0.
    pub(crate) fn release(&mut self) -> u32 {
        assert!(self.refcount > 0, "session refcount underflow");
        self.refcount -= 1;
        self.refcount
    }

    /// Mark destroyed and hand back whatever is still buffered.
    pub(crate) fn destroy(&mut self) -> VecDeque<Page> {
        self.destroyed = true;
        self.buffered_bytes = 0;
        std::mem::take(&mut self.pages)
    }

    #[inline]
    pub(crate) fn begin_flight(&mut self) {
        self.flushes_in_flight += 1;
    }

    /// Returns true when no flush is left in flight.
    pub(crate) fn end_flight(&mut self) -> bool {
        assert!(self.flushes_in_flight > 0, "in-flight flush underflow");
        self.flushes_in_flight -= 1;
        self.flushes_in_flight == 0
    }
}

/// Buffering state for one open file.
///
/// Sessions are shared between caller operations and flush completions, so
/// all state sits behind a single `Mutex`. The lock is never held across a
/// backend call; it only covers the bookkeeping before and after one.
///
/// Sessions are handed around as [`SessionRef`](crate::buffer::SessionRef)s,
/// which count as references. When the last one drops the session is
/// destroyed.
pub struct Session {
    handle: FileHandle,
    state: Mutex<SessionState>,
    /// Signalled when the last in-flight flush completes.
    idle: Notify,
    stats: Arc<WriteBackStats>,
}

impl Session {
    /// Create an unreferenced session for `handle`.
    pub(crate) fn new(handle: FileHandle, stats: Arc<WriteBackStats>) -> Arc<Self> {
        Arc::new(Self {
            handle,
            state: Mutex::new(SessionState::default()),
            idle: Notify::new(),
            stats,
        })
    }

    /// Enter the session's critical section.
    #[inline]
    pub(crate) fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock()
    }

    #[inline]
    pub(crate) fn stats(&self) -> &WriteBackStats {
        &self.stats
    }

    /// Wake everyone waiting in [`wait_for_flushes`](Self::wait_for_flushes).
    pub(crate) fn notify_idle(&self) {
        self.idle.notify_waiters();
    }

    /// Wait until no flush of this session is in flight.
    ///
    /// Flushes issued while waiting are waited for as well.
    pub async fn wait_for_flushes(&self) {
        loop {
            // Register before checking so a completion in between is not lost
            let notified = self.idle.notified();
            let in_flight = self.lock().flushes_in_flight;
            if in_flight == 0 {
                return;
            }
            notified.await;
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Backend handle this session buffers for.
    #[inline]
    pub fn handle(&self) -> FileHandle {
        self.handle
    }

    pub fn refcount(&self) -> u32 {
        self.lock().refcount
    }

    pub fn buffered_bytes(&self) -> usize {
        self.lock().buffered_bytes
    }

    pub fn pending_pages(&self) -> usize {
        self.lock().pages.len()
    }

    pub fn expected_offset(&self) -> Option<u64> {
        self.lock().expected_offset
    }

    pub fn has_deferred_error(&self) -> bool {
        self.lock().deferred_error.is_some()
    }

    pub fn flushes_in_flight(&self) -> u32 {
        self.lock().flushes_in_flight
    }

    /// Whether release has started; writes are refused from then on.
    pub fn is_releasing(&self) -> bool {
        self.lock().releasing
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock().destroyed
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("expected_offset", &state.expected_offset)
            .field("buffered_bytes", &state.buffered_bytes)
            .field("pages", &state.pages.len())
            .field("refcount", &state.refcount)
            .field("releasing", &state.releasing)
            .field("destroyed", &state.destroyed)
            .finish()
    }
}
