//! Write-Back Manager - the buffering layer in front of a backend.
//!
//! The [`WriteBackManager`] provides:
//! - Optimistic acknowledgement of writes, buffered per open file
//! - Coalescing of contiguous writes into fewer, larger backend writes
//! - Deferred delivery of asynchronous flush failures
//! - Forced drains before every read, flush, fsync and release

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, error, trace};

use crate::buffer::flush::{begin_flush, FlushEngine, FlushReason};
use crate::buffer::{Page, Session, SessionRef, SessionRegistry, WriteBackStats};
use crate::common::{BackendResult, Error, FileHandle, Result, WriteBackConfig};
use crate::storage::{Backend, OpenFlags};

/// Buffers writes in front of a [`Backend`].
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────────────┐
/// │                     WriteBackManager                        │
/// │  ┌──────────────┐  ┌───────────────────────────────────┐   │
/// │  │  registry    │  │  sessions (one per open handle)   │   │
/// │  │Handle → Sess │─▶│  [pages] [pages] [pages] ...      │   │
/// │  └──────────────┘  └───────────────────────────────────┘   │
/// │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
/// │  │   config     │  │   flusher    │  │   backend    │      │
/// │  │aggregate_size│  │ FlushEngine  │  │   Arc<B>     │      │
/// │  └──────────────┘  └──────────────┘  └──────────────┘      │
/// └─────────────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `registry`: `RwLock`, every operation looks up, open/release modify
/// - sessions: one `Mutex` each, the whole per-file critical section
/// - `backend`: shared, called outside every lock
/// - `stats`: No lock, all atomic counters
///
/// All operations are async and must run inside a tokio runtime, since
/// threshold and seek flushes are spawned as tasks.
///
/// # Usage
/// ```ignore
/// let backend = Arc::new(MemoryBackend::new());
/// let manager = WriteBackManager::new(WriteBackConfig::default(), backend);
///
/// let handle = manager.create("log", 0o644).await?;
/// manager.write(handle, b"hello ", 0).await?;   // acknowledged, buffered
/// manager.write(handle, b"world", 6).await?;    // same run
/// manager.fsync(handle, false).await?;          // one backend write, then fsync
/// manager.release(handle).await?;
/// ```
pub struct WriteBackManager<B: Backend> {
    /// Immutable after construction.
    config: WriteBackConfig,

    /// Downstream storage every operation ends up at.
    backend: Arc<B>,

    /// Maps backend handles to sessions.
    registry: SessionRegistry,

    /// Issues drained runs to the backend.
    flusher: FlushEngine<B>,

    stats: Arc<WriteBackStats>,
}

impl<B: Backend> WriteBackManager<B> {
    /// Create a manager buffering in front of `backend`.
    pub fn new(config: WriteBackConfig, backend: Arc<B>) -> Self {
        let stats = Arc::new(WriteBackStats::new());
        debug!(aggregate_size = config.aggregate_size(), "write-back layer started");

        Self {
            config,
            registry: SessionRegistry::new(Arc::clone(&stats)),
            flusher: FlushEngine::new(Arc::clone(&backend), Arc::clone(&stats)),
            backend,
            stats,
        }
    }

    /// Create a manager from the layer's list of downstream backends.
    ///
    /// # Errors
    /// `Error::Configuration` unless exactly one backend is attached.
    pub fn from_children(config: WriteBackConfig, mut children: Vec<Arc<B>>) -> Result<Self> {
        let count = children.len();
        match children.pop() {
            Some(backend) if count == 1 => Ok(Self::new(config, backend)),
            _ => {
                error!(children = count, "write-back layer needs exactly one backend");
                Err(Error::Configuration(format!(
                    "write-back layer needs exactly one backend, found {}",
                    count
                )))
            }
        }
    }

    // ========================================================================
    // Public API: Open and create
    // ========================================================================

    /// Open `path` on the backend and start buffering for the new handle.
    ///
    /// # Errors
    /// - `Error::Backend` if the backend open fails (nothing is registered)
    /// - `Error::HandleInUse` if the backend returned a handle that is
    ///   already registered
    pub async fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> Result<FileHandle> {
        let handle = self.backend.open(path, flags, mode).await?;
        self.register(handle)?;
        debug!(handle = %handle, path, %flags, "opened");
        Ok(handle)
    }

    /// Create `path` on the backend and start buffering for the new handle.
    ///
    /// # Errors
    /// Same as [`open`](Self::open).
    pub async fn create(&self, path: &str, mode: u32) -> Result<FileHandle> {
        let handle = self.backend.create(path, mode).await?;
        self.register(handle)?;
        debug!(handle = %handle, path, "created");
        Ok(handle)
    }

    // ========================================================================
    // Public API: Write path
    // ========================================================================

    /// Buffer `data` at `offset`. Single-buffer form of [`writev`](Self::writev).
    pub async fn write(&self, handle: FileHandle, data: &[u8], offset: u64) -> Result<usize> {
        self.writev(handle, &[data], offset).await
    }

    /// Buffer the concatenation of `bufs` at `offset` and acknowledge it.
    ///
    /// Returns the full requested length before anything reaches the
    /// backend. The data is copied, so the caller's buffers are free to go
    /// as soon as this returns.
    ///
    /// A write that does not continue the current run flushes that run
    /// first. Once the buffered byte count reaches the aggregate size the
    /// run is flushed in the background.
    ///
    /// # Ordering
    /// Seek and threshold flushes run as separate tasks. On a multi-thread
    /// runtime two of them can reach the backend in either order, so when a
    /// write overlaps an earlier one from a different run, the file may hold
    /// the older bytes until the next sync point. Issue a
    /// [`flush`](Self::flush) between overlapping rewrites if their order
    /// on the backend matters.
    ///
    /// # Errors
    /// - `Error::Backend` carrying a failure from an earlier flush of this
    ///   file. The error is cleared and this write's data is discarded.
    /// - `Error::UnregisteredHandle` if `handle` has no session, or a
    ///   concurrent release has already started draining it. Nothing is
    ///   buffered then.
    pub async fn writev(&self, handle: FileHandle, bufs: &[&[u8]], offset: u64) -> Result<usize> {
        let session = self.registry.lookup(handle)?;

        let len: usize = bufs.iter().map(|b| b.len()).sum();
        if len == 0 {
            return Ok(0);
        }

        // Copy outside the critical section
        let page = Page::copy_from(offset, bufs);

        let (seek_flush, outcome) = {
            let mut state = session.lock();

            // Release flushes one last time after setting this; anything
            // appended now would never reach the backend
            if state.is_releasing() {
                drop(state);
                debug!(handle = %handle, offset, len, "write raced release");
                return Err(Error::UnregisteredHandle(handle));
            }

            let seek_flush = if state.is_contiguous(offset) {
                None
            } else {
                begin_flush(&session, &mut state)
            };

            let outcome = match state.take_deferred_error() {
                Some(err) => Err(err),
                None => {
                    state.append(page);
                    if state.buffered_bytes() >= self.config.aggregate_size() {
                        Ok(begin_flush(&session, &mut state))
                    } else {
                        Ok(None)
                    }
                }
            };

            (seek_flush, outcome)
        };

        if let Some(flush) = seek_flush {
            trace!(handle = %handle, offset, "write.seek");
            self.flusher.spawn(flush, FlushReason::Seek);
        }

        match outcome {
            Err(err) => {
                self.stats
                    .deferred_errors_delivered
                    .fetch_add(1, Ordering::Relaxed);
                debug!(handle = %handle, offset, len, error = %err, "write rejected with deferred error");
                Err(err.into())
            }
            Ok(threshold_flush) => {
                if let Some(flush) = threshold_flush {
                    self.flusher.spawn(flush, FlushReason::Threshold);
                }
                self.stats.writes_buffered.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .bytes_buffered
                    .fetch_add(len as u64, Ordering::Relaxed);
                trace!(handle = %handle, offset, len, "write.buffered");
                Ok(len)
            }
        }
    }

    // ========================================================================
    // Public API: Sync points
    // ========================================================================

    /// Read from the backend after flushing everything buffered for `handle`.
    ///
    /// Sees every write acknowledged before the call. Leaves a deferred
    /// error in place for the next write, flush, fsync or release.
    ///
    /// # Errors
    /// - `Error::Backend` if the backend read fails
    /// - `Error::UnregisteredHandle` if `handle` has no session
    pub async fn read(&self, handle: FileHandle, size: usize, offset: u64) -> Result<Bytes> {
        let session = self.registry.lookup(handle)?;
        self.flusher.flush_now(&session).await;

        let data = self.backend.read(handle, size, offset).await?;
        Ok(data)
    }

    /// Flush buffered writes, then forward a flush to the backend.
    ///
    /// # Errors
    /// - `Error::Backend`: a deferred flush failure if one was pending,
    ///   otherwise the backend flush's own failure
    /// - `Error::UnregisteredHandle` if `handle` has no session
    pub async fn flush(&self, handle: FileHandle) -> Result<()> {
        let session = self.registry.lookup(handle)?;
        self.flusher.flush_now(&session).await;

        let result = self.backend.flush(handle).await;
        self.deliver(&session, result)
    }

    /// Flush buffered writes, then forward an fsync to the backend.
    ///
    /// # Errors
    /// Same as [`flush`](Self::flush).
    pub async fn fsync(&self, handle: FileHandle, datasync: bool) -> Result<()> {
        let session = self.registry.lookup(handle)?;
        self.flusher.flush_now(&session).await;

        let result = self.backend.fsync(handle, datasync).await;
        self.deliver(&session, result)
    }

    /// Flush buffered writes, unregister `handle` and release it on the backend.
    ///
    /// Writes racing the release are either part of the final flush or
    /// refused with `Error::UnregisteredHandle`; none is acknowledged and
    /// then dropped.
    ///
    /// The session is destroyed once the last outstanding reference to it
    /// is gone, which is at the end of this call unless a background flush
    /// still holds one.
    ///
    /// # Errors
    /// - `Error::Backend`: a deferred flush failure if one was pending,
    ///   otherwise the backend release's own failure
    /// - `Error::UnregisteredHandle` if `handle` has no session, or a
    ///   concurrent release got to it first (nothing is forwarded then)
    pub async fn release(&self, handle: FileHandle) -> Result<()> {
        let session = self.registry.lookup(handle)?;
        self.flusher.flush_now(&session).await;

        if !self.registry.remove(handle) {
            error!(handle = %handle, "handle released twice");
            return Err(Error::UnregisteredHandle(handle));
        }

        // Writers that looked the session up before the removal may have
        // appended during the first drain
        session.lock().mark_releasing();
        self.flusher.flush_now(&session).await;

        let result = self.backend.release(handle).await;
        let result = self.deliver(&session, result);
        debug!(handle = %handle, ok = result.is_ok(), "released");

        drop(session);
        result
    }

    /// Flush every registered session and wait for the writes to land.
    ///
    /// Forwards nothing else to the backend and leaves deferred errors in
    /// place for each file's next sync point.
    pub async fn flush_all(&self) {
        let sessions = self.registry.sessions();
        debug!(sessions = sessions.len(), "flushing all sessions");

        for session in &sessions {
            self.flusher.flush_now(session).await;
        }
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    /// Get write-back statistics.
    pub fn stats(&self) -> &WriteBackStats {
        &self.stats
    }

    pub fn config(&self) -> &WriteBackConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Get the number of open handles with a session.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Bytes acknowledged for `handle` and not yet handed to the backend.
    ///
    /// # Errors
    /// `Error::UnregisteredHandle` if `handle` has no session.
    pub fn buffered_bytes(&self, handle: FileHandle) -> Result<usize> {
        Ok(self.registry.lookup(handle)?.buffered_bytes())
    }

    /// Take a reference on the session for `handle`.
    ///
    /// The session outlives its release for as long as the returned
    /// reference is held.
    ///
    /// # Errors
    /// `Error::UnregisteredHandle` if `handle` has no session.
    pub fn session(&self, handle: FileHandle) -> Result<SessionRef> {
        self.registry.lookup(handle)
    }

    // ========================================================================
    // Internal
    // ========================================================================

    fn register(&self, handle: FileHandle) -> Result<()> {
        let session = Session::new(handle, Arc::clone(&self.stats));
        self.registry.associate(handle, session)
    }

    /// Report a pending deferred error in place of `result`, else `result`.
    ///
    /// Called after the forwarded operation completed, so the backend
    /// always sees the operation.
    fn deliver(&self, session: &SessionRef, result: BackendResult<()>) -> Result<()> {
        let deferred = session.lock().take_deferred_error();
        match deferred {
            Some(err) => {
                self.stats
                    .deferred_errors_delivered
                    .fetch_add(1, Ordering::Relaxed);
                if let Err(own) = &result {
                    debug!(handle = %session.handle(), error = %own, "backend result superseded by deferred error");
                }
                Err(err.into())
            }
            None => result.map_err(Error::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::BackendError;
    use crate::storage::{BackendOp, MemoryBackend};

    const KIB: usize = 1024;

    fn create_test_manager(aggregate_size: usize) -> (WriteBackManager<MemoryBackend>, Arc<MemoryBackend>) {
        let backend = Arc::new(MemoryBackend::new());
        let config = WriteBackConfig::new(aggregate_size).unwrap();
        (WriteBackManager::new(config, Arc::clone(&backend)), backend)
    }

    #[tokio::test]
    async fn test_create_registers_session() {
        let (wb, backend) = create_test_manager(1024 * KIB);

        let handle = wb.create("f", 0o644).await.unwrap();
        assert_eq!(wb.session_count(), 1);
        assert_eq!(wb.buffered_bytes(handle).unwrap(), 0);
        assert_eq!(backend.open_handles(), 1);

        let session = wb.session(handle).unwrap();
        assert_eq!(session.expected_offset(), None);
        // Creation reference plus ours
        assert_eq!(session.refcount(), 2);
    }

    #[tokio::test]
    async fn test_open_failure_registers_nothing() {
        let (wb, _backend) = create_test_manager(1024 * KIB);

        let err = wb.open("missing", OpenFlags::READ, 0).await.unwrap_err();
        assert_eq!(err.backend_error().unwrap().errno(), BackendError::ENOENT);
        assert_eq!(wb.session_count(), 0);
    }

    #[tokio::test]
    async fn test_writes_below_threshold_stay_buffered() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let handle = wb.create("f", 0o644).await.unwrap();
        let chunk = vec![7u8; 300 * KIB];

        for i in 0..3 {
            let n = wb.write(handle, &chunk, (i * 300 * KIB) as u64).await.unwrap();
            assert_eq!(n, 300 * KIB);
        }

        assert_eq!(backend.write_count(), 0);
        assert_eq!(wb.buffered_bytes(handle).unwrap(), 900 * KIB);
    }

    #[tokio::test]
    async fn test_threshold_triggers_background_flush() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let handle = wb.create("f", 0o644).await.unwrap();
        let chunk = vec![7u8; 300 * KIB];

        for i in 0..4 {
            wb.write(handle, &chunk, (i * 300 * KIB) as u64).await.unwrap();
        }

        // Drained at acknowledgement time
        assert_eq!(wb.buffered_bytes(handle).unwrap(), 0);

        backend.wait_for_writes(1).await;
        let calls = backend.write_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].offset, 0);
        assert_eq!(calls[0].data.len(), 1200 * KIB);
        assert_eq!(wb.stats().snapshot().threshold_flushes, 1);
    }

    #[tokio::test]
    async fn test_threshold_reached_exactly() {
        let (wb, backend) = create_test_manager(8);
        let handle = wb.create("f", 0o644).await.unwrap();

        wb.write(handle, b"1234", 0).await.unwrap();
        wb.write(handle, b"5678", 4).await.unwrap();

        backend.wait_for_writes(1).await;
        assert_eq!(backend.contents("f").unwrap(), b"12345678");
    }

    #[tokio::test]
    async fn test_seek_flushes_prior_run_only() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let handle = wb.create("f", 0o644).await.unwrap();

        wb.write(handle, b"aaaa", 0).await.unwrap();
        wb.write(handle, b"bbbb", 4).await.unwrap();
        // Gap
        wb.write(handle, b"cccc", 100).await.unwrap();

        backend.wait_for_writes(1).await;
        let calls = backend.write_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].offset, 0);
        assert_eq!(&calls[0].data[..], b"aaaabbbb");

        // The new write starts the next run
        assert_eq!(wb.buffered_bytes(handle).unwrap(), 4);
        let session = wb.session(handle).unwrap();
        assert_eq!(session.expected_offset(), Some(104));
        assert_eq!(wb.stats().snapshot().seek_flushes, 1);
    }

    #[tokio::test]
    async fn test_backward_write_is_a_seek() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let handle = wb.create("f", 0o644).await.unwrap();

        wb.write(handle, b"xxxx", 10).await.unwrap();
        wb.write(handle, b"yy", 0).await.unwrap();

        backend.wait_for_writes(1).await;
        assert_eq!(backend.write_calls()[0].offset, 10);
        assert_eq!(wb.buffered_bytes(handle).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_writev_buffers_concatenation() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let handle = wb.create("f", 0o644).await.unwrap();

        let n = wb.writev(handle, &[b"he", b"llo", b" "], 0).await.unwrap();
        assert_eq!(n, 6);
        wb.write(handle, b"world", 6).await.unwrap();
        wb.flush(handle).await.unwrap();

        let calls = backend.write_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(&calls[0].data[..], b"hello world");
        assert_eq!(wb.stats().snapshot().pages_flushed, 2);
    }

    #[tokio::test]
    async fn test_zero_length_write() {
        let (wb, backend) = create_test_manager(1);
        let handle = wb.create("f", 0o644).await.unwrap();
        backend.fail_next(BackendOp::Write, BackendError::io("boom"));

        // Threshold of one byte, yet nothing happens
        assert_eq!(wb.write(handle, b"", 0).await.unwrap(), 0);
        assert_eq!(wb.writev(handle, &[], 50).await.unwrap(), 0);

        let session = wb.session(handle).unwrap();
        assert_eq!(session.buffered_bytes(), 0);
        assert_eq!(session.expected_offset(), None);
        assert_eq!(backend.write_count(), 0);
        assert_eq!(wb.stats().snapshot().writes_buffered, 0);
    }

    #[tokio::test]
    async fn test_deferred_error_delivered_once_to_write() {
        let (wb, backend) = create_test_manager(4);
        let handle = wb.create("f", 0o644).await.unwrap();
        backend.fail_next(BackendOp::Write, BackendError::no_space("disk full"));

        // Triggers a failing background flush, still acknowledged
        assert_eq!(wb.write(handle, b"abcd", 0).await.unwrap(), 4);
        backend.wait_for_writes(1).await;
        wb.session(handle).unwrap().wait_for_flushes().await;

        let err = wb.write(handle, b"ef", 4).await.unwrap_err();
        assert_eq!(err.backend_error().unwrap().errno(), BackendError::ENOSPC);
        // Payload discarded
        assert_eq!(wb.buffered_bytes(handle).unwrap(), 0);

        // Delivered exactly once
        assert_eq!(wb.write(handle, b"ef", 4).await.unwrap(), 2);
        wb.flush(handle).await.unwrap();

        let snapshot = wb.stats().snapshot();
        assert_eq!(snapshot.deferred_errors_recorded, 1);
        assert_eq!(snapshot.deferred_errors_delivered, 1);
    }

    #[tokio::test]
    async fn test_flush_forwards_and_substitutes() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let handle = wb.create("f", 0o644).await.unwrap();
        backend.fail_next(BackendOp::Write, BackendError::io("bad sector"));

        wb.write(handle, b"data", 0).await.unwrap();
        let err = wb.flush(handle).await.unwrap_err();
        assert_eq!(err.backend_error().unwrap().errno(), BackendError::EIO);
        // The flush itself still reached the backend
        assert_eq!(backend.flush_calls(), 1);

        wb.flush(handle).await.unwrap();
        assert_eq!(backend.flush_calls(), 2);
    }

    #[tokio::test]
    async fn test_deferred_error_wins_over_backend_result() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let handle = wb.create("f", 0o644).await.unwrap();
        backend.fail_next(BackendOp::Write, BackendError::no_space("full"));
        backend.fail_next(BackendOp::Fsync, BackendError::io("fsync failed"));

        wb.write(handle, b"data", 0).await.unwrap();
        let err = wb.fsync(handle, true).await.unwrap_err();
        assert_eq!(err.backend_error().unwrap().errno(), BackendError::ENOSPC);
        assert_eq!(backend.fsync_calls(), 1);
    }

    #[tokio::test]
    async fn test_fsync_reports_backend_result() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let handle = wb.create("f", 0o644).await.unwrap();
        backend.fail_next(BackendOp::Fsync, BackendError::io("fsync failed"));

        let err = wb.fsync(handle, false).await.unwrap_err();
        assert_eq!(err.backend_error().unwrap().errno(), BackendError::EIO);
        wb.fsync(handle, false).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_sees_buffered_writes() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let handle = wb.create("f", 0o644).await.unwrap();

        wb.write(handle, b"hello", 0).await.unwrap();
        assert_eq!(backend.write_count(), 0);

        let data = wb.read(handle, 5, 0).await.unwrap();
        assert_eq!(&data[..], b"hello");
        assert_eq!(wb.buffered_bytes(handle).unwrap(), 0);
        assert_eq!(wb.stats().snapshot().sync_flushes, 1);
    }

    #[tokio::test]
    async fn test_read_leaves_deferred_error() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let handle = wb.create("f", 0o644).await.unwrap();
        backend.fail_next(BackendOp::Write, BackendError::io("lost"));

        wb.write(handle, b"lost", 0).await.unwrap();
        let data = wb.read(handle, 4, 0).await.unwrap();
        assert!(data.is_empty());

        assert!(wb.session(handle).unwrap().has_deferred_error());
        assert!(wb.flush(handle).await.is_err());
    }

    #[tokio::test]
    async fn test_release_flushes_and_destroys() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let handle = wb.create("f", 0o644).await.unwrap();
        let session = Arc::clone(wb.session(handle).unwrap().session());

        wb.write(handle, b"tail", 0).await.unwrap();
        wb.release(handle).await.unwrap();

        assert_eq!(backend.contents("f").unwrap(), b"tail");
        assert_eq!(backend.release_calls(), 1);
        assert_eq!(wb.session_count(), 0);
        assert!(session.is_destroyed());
        assert_eq!(wb.stats().snapshot().live_sessions(), 0);
    }

    #[tokio::test]
    async fn test_write_refused_once_releasing() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let handle = wb.create("f", 0o644).await.unwrap();
        let session = wb.session(handle).unwrap();

        wb.write(handle, b"kept", 0).await.unwrap();
        session.lock().mark_releasing();

        let err = wb.write(handle, b"late", 4).await.unwrap_err();
        assert!(matches!(err, Error::UnregisteredHandle(h) if h == handle));
        assert_eq!(session.buffered_bytes(), 4);
        assert_eq!(wb.stats().snapshot().writes_buffered, 1);

        drop(session);
        wb.release(handle).await.unwrap();
        assert_eq!(backend.contents("f").unwrap(), b"kept");
    }

    #[tokio::test]
    async fn test_release_delivers_deferred_error() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let handle = wb.create("f", 0o644).await.unwrap();
        backend.fail_next(BackendOp::Write, BackendError::no_space("full"));

        wb.write(handle, b"data", 0).await.unwrap();
        let err = wb.release(handle).await.unwrap_err();
        assert_eq!(err.backend_error().unwrap().errno(), BackendError::ENOSPC);

        // Released on the backend all the same
        assert_eq!(backend.release_calls(), 1);
        assert_eq!(backend.open_handles(), 0);
        assert_eq!(wb.session_count(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_handle() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let bogus = FileHandle::new(77);

        let err = wb.write(bogus, b"x", 0).await.unwrap_err();
        assert!(err.is_protocol());
        assert!(matches!(wb.read(bogus, 1, 0).await, Err(Error::UnregisteredHandle(_))));
        assert!(matches!(wb.flush(bogus).await, Err(Error::UnregisteredHandle(_))));
        assert!(matches!(wb.fsync(bogus, false).await, Err(Error::UnregisteredHandle(_))));
        assert!(matches!(wb.release(bogus).await, Err(Error::UnregisteredHandle(_))));

        // Nothing forwarded
        assert_eq!(backend.flush_calls(), 0);
        assert_eq!(backend.fsync_calls(), 0);
        assert_eq!(backend.release_calls(), 0);
    }

    #[tokio::test]
    async fn test_double_release() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let handle = wb.create("f", 0o644).await.unwrap();

        wb.release(handle).await.unwrap();
        assert!(matches!(wb.release(handle).await, Err(Error::UnregisteredHandle(_))));
        assert_eq!(backend.release_calls(), 1);
    }

    #[tokio::test]
    async fn test_flush_all() {
        let (wb, backend) = create_test_manager(1024 * KIB);
        let a = wb.create("a", 0o644).await.unwrap();
        let b = wb.create("b", 0o644).await.unwrap();
        backend.fail_next(BackendOp::Write, BackendError::io("first write fails"));

        wb.write(a, b"aaa", 0).await.unwrap();
        wb.write(b, b"bbb", 0).await.unwrap();
        wb.flush_all().await;

        assert_eq!(backend.write_count(), 2);
        assert_eq!(wb.buffered_bytes(a).unwrap(), 0);
        assert_eq!(wb.buffered_bytes(b).unwrap(), 0);
        assert_eq!(backend.flush_calls(), 0);

        // Exactly one of them failed, and it is still pending delivery
        let pending = [a, b]
            .iter()
            .filter(|h| wb.session(**h).unwrap().has_deferred_error())
            .count();
        assert_eq!(pending, 1);
    }

    #[test]
    fn test_from_children() {
        let config = WriteBackConfig::default();
        let one = vec![Arc::new(MemoryBackend::new())];
        assert!(WriteBackManager::from_children(config, one).is_ok());

        let none: Vec<Arc<MemoryBackend>> = Vec::new();
        assert!(matches!(
            WriteBackManager::from_children(config, none),
            Err(Error::Configuration(_))
        ));

        let two = vec![Arc::new(MemoryBackend::new()), Arc::new(MemoryBackend::new())];
        assert!(matches!(
            WriteBackManager::from_children(config, two),
            Err(Error::Configuration(_))
        ));
    }
}
