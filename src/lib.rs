//! writeback - A write-back buffering layer for asynchronous storage backends.
//!
//! Small sequential writes are acknowledged immediately, held in memory and
//! coalesced into fewer, larger backend writes. Failures of those delayed
//! writes are reported at the file's next synchronization point.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                          writeback                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │                Caller (file-write API)                   │   │
//! │  │   open · create · writev · read · flush · fsync · release│   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Write-Back Layer (buffer/)                  │   │
//! │  │   ┌─────────────────────────────────────────────────┐   │   │
//! │  │   │  SessionRegistry: FileHandle → Session          │   │   │
//! │  │   │  Session: contiguous run of Pages + deferred err│   │   │
//! │  │   └─────────────────────────────────────────────────┘   │   │
//! │  │      WriteBackManager + FlushEngine + Statistics         │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! │                              ↓                                  │
//! │  ┌─────────────────────────────────────────────────────────┐   │
//! │  │              Storage Layer (storage/)                    │   │
//! │  │      Backend trait: MemoryBackend | FileBackend          │   │
//! │  └─────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (FileHandle, Error, config)
//! - [`buffer`] - Sessions, aggregation and flushing
//! - [`storage`] - Backends
//! - [`error`] - Error types
//!
//! # Quick Start
//! ```
//! use std::sync::Arc;
//! use writeback::storage::MemoryBackend;
//! use writeback::{WriteBackConfig, WriteBackManager};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let backend = Arc::new(MemoryBackend::new());
//! let manager = WriteBackManager::new(WriteBackConfig::default(), Arc::clone(&backend));
//!
//! let handle = manager.create("journal", 0o644).await.unwrap();
//! manager.write(handle, b"first ", 0).await.unwrap();
//! manager.write(handle, b"second", 6).await.unwrap();
//! assert_eq!(backend.write_count(), 0);
//!
//! // One coalesced backend write, then the release itself
//! manager.release(handle).await.unwrap();
//! assert_eq!(backend.contents("journal").unwrap(), b"first second");
//! assert_eq!(backend.write_count(), 1);
//! # });
//! ```

pub mod buffer;
pub mod common;
pub mod error;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::{BackendError, BackendResult, Error, FileHandle, Result, WriteBackConfig};

pub use buffer::{StatsSnapshot, WriteBackManager, WriteBackStats};
pub use storage::{Backend, FileBackend, MemoryBackend, OpenFlags};
