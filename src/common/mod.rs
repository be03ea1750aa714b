//! Common types and utilities shared across the write-back layer.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration
//! - Error types
//! - Identifiers (FileHandle)

pub mod config;
mod file_handle;

pub use crate::error::{BackendError, BackendResult, Error, Result};
pub use config::WriteBackConfig;
pub use file_handle::FileHandle;
