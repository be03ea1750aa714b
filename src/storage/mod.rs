//! Storage layer - the backends the write-back layer forwards to.
//!
//! This module handles downstream storage:
//! - [`Backend`] - The asynchronous storage operations consumed
//! - [`MemoryBackend`] - In-memory backend with call log and fault injection
//! - [`FileBackend`] - Local filesystem backend

mod backend;
mod file_backend;
mod memory_backend;

pub use backend::{Backend, OpenFlags};
pub use file_backend::FileBackend;
pub use memory_backend::{BackendOp, MemoryBackend, WriteCall, WriteHold};
