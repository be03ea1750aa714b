//! In-memory backend.
//!
//! Keeps file contents in memory and records every call it receives, which
//! makes it the backend of choice for tests and benchmarks. It can also fail
//! chosen operations on demand and hold writes pending to simulate a slow
//! device.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{Notify, OwnedRwLockWriteGuard, RwLock};

use crate::common::{BackendError, BackendResult, FileHandle};
use crate::storage::backend::{Backend, OpenFlags};

/// Backend operation kinds, used to target injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendOp {
    Open,
    Create,
    Write,
    Read,
    Flush,
    Fsync,
    Release,
}

/// One `write` call as seen by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    pub handle: FileHandle,
    pub offset: u64,
    pub data: Bytes,
    /// False if the call completed with an injected failure.
    pub succeeded: bool,
}

#[derive(Default)]
struct MemoryState {
    next_handle: u64,
    files: HashMap<String, Vec<u8>>,
    handles: HashMap<FileHandle, String>,
    write_log: Vec<WriteCall>,
    flush_calls: usize,
    fsync_calls: usize,
    release_calls: usize,
    failures: HashMap<BackendOp, VecDeque<BackendError>>,
}

impl MemoryState {
    fn take_failure(&mut self, op: BackendOp) -> Option<BackendError> {
        self.failures.get_mut(&op).and_then(|queue| queue.pop_front())
    }

    fn path_of(&self, handle: FileHandle) -> BackendResult<&str> {
        self.handles
            .get(&handle)
            .map(String::as_str)
            .ok_or_else(|| BackendError::bad_handle(format!("{} is not open", handle)))
    }

    fn register(&mut self, path: &str) -> FileHandle {
        let handle = FileHandle::new(self.next_handle);
        self.next_handle += 1;
        self.handles.insert(handle, path.to_string());
        handle
    }
}

/// Backend that keeps everything in memory.
///
/// # Example
/// ```
/// use writeback::storage::{Backend, MemoryBackend};
/// # tokio_test_block_on(async {
/// let backend = MemoryBackend::new();
/// let handle = backend.create("a.txt", 0o644).await.unwrap();
/// backend.write(handle, "hello".into(), 0).await.unwrap();
/// assert_eq!(backend.contents("a.txt").unwrap(), b"hello");
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    write_done: Notify,
    write_gate: Arc<RwLock<()>>,
}

/// Holds every backend write pending until dropped.
///
/// Returned by [`MemoryBackend::hold_writes`].
pub struct WriteHold {
    _guard: OwnedRwLockWriteGuard<()>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Fault injection and pacing
    // ========================================================================

    /// Make the next call of `op` fail with `error`.
    ///
    /// Injected failures queue up: calling this twice fails the next two calls.
    pub fn fail_next(&self, op: BackendOp, error: BackendError) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Block every `write` call until the returned guard is dropped.
    ///
    /// Writes already past the gate are not affected.
    pub async fn hold_writes(&self) -> WriteHold {
        WriteHold {
            _guard: Arc::clone(&self.write_gate).write_owned().await,
        }
    }

    /// Wait until at least `count` write calls have completed.
    pub async fn wait_for_writes(&self, count: usize) {
        loop {
            let notified = self.write_done.notified();
            let completed = self.state.lock().write_log.len();
            if completed >= count {
                return;
            }
            notified.await;
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Current contents of the file at `path`.
    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).cloned()
    }

    /// Every completed write call, in completion order.
    pub fn write_calls(&self) -> Vec<WriteCall> {
        self.state.lock().write_log.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().write_log.len()
    }

    pub fn flush_calls(&self) -> usize {
        self.state.lock().flush_calls
    }

    pub fn fsync_calls(&self) -> usize {
        self.state.lock().fsync_calls
    }

    pub fn release_calls(&self) -> usize {
        self.state.lock().release_calls
    }

    /// Number of handles opened and not yet released.
    pub fn open_handles(&self) -> usize {
        self.state.lock().handles.len()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn open(&self, path: &str, flags: OpenFlags, _mode: u32) -> BackendResult<FileHandle> {
        let mut state = self.state.lock();
        if let Some(err) = state.take_failure(BackendOp::Open) {
            return Err(err);
        }

        match state.files.get_mut(path) {
            Some(contents) => {
                if flags.contains(OpenFlags::TRUNCATE) {
                    contents.clear();
                }
            }
            None if flags.contains(OpenFlags::CREATE) => {
                state.files.insert(path.to_string(), Vec::new());
            }
            None => return Err(BackendError::not_found(path.to_string())),
        }

        Ok(state.register(path))
    }

    async fn create(&self, path: &str, _mode: u32) -> BackendResult<FileHandle> {
        let mut state = self.state.lock();
        if let Some(err) = state.take_failure(BackendOp::Create) {
            return Err(err);
        }

        state.files.insert(path.to_string(), Vec::new());
        Ok(state.register(path))
    }

    async fn write(&self, handle: FileHandle, data: Bytes, offset: u64) -> BackendResult<usize> {
        let _gate = self.write_gate.read().await;

        let result = {
            let mut state = self.state.lock();
            let target = match state.take_failure(BackendOp::Write) {
                Some(err) => Err(err),
                None => state.path_of(handle).map(str::to_string),
            };
            let result = target.map(|path| {
                let file = state.files.entry(path).or_default();
                let start = offset as usize;
                let end = start + data.len();
                if file.len() < end {
                    file.resize(end, 0);
                }
                file[start..end].copy_from_slice(&data);
                data.len()
            });
            state.write_log.push(WriteCall {
                handle,
                offset,
                data,
                succeeded: result.is_ok(),
            });
            result
        };

        self.write_done.notify_waiters();
        result
    }

    async fn read(&self, handle: FileHandle, size: usize, offset: u64) -> BackendResult<Bytes> {
        let mut state = self.state.lock();
        if let Some(err) = state.take_failure(BackendOp::Read) {
            return Err(err);
        }

        let path = state.path_of(handle)?;
        let file = state.files.get(path).map(Vec::as_slice).unwrap_or_default();
        let start = (offset as usize).min(file.len());
        let end = start.saturating_add(size).min(file.len());
        Ok(Bytes::copy_from_slice(&file[start..end]))
    }

    async fn flush(&self, handle: FileHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.flush_calls += 1;
        if let Some(err) = state.take_failure(BackendOp::Flush) {
            return Err(err);
        }
        state.path_of(handle).map(|_| ())
    }

    async fn fsync(&self, handle: FileHandle, _datasync: bool) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.fsync_calls += 1;
        if let Some(err) = state.take_failure(BackendOp::Fsync) {
            return Err(err);
        }
        state.path_of(handle).map(|_| ())
    }

    async fn release(&self, handle: FileHandle) -> BackendResult<()> {
        let mut state = self.state.lock();
        state.release_calls += 1;
        if let Some(err) = state.take_failure(BackendOp::Release) {
            return Err(err);
        }
        state
            .handles
            .remove(&handle)
            .map(|_| ())
            .ok_or_else(|| BackendError::bad_handle(format!("{} is not open", handle)))
    }
}
