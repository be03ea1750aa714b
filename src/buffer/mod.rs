//! Write-back buffering.
//!
//! Writes are acknowledged as soon as they are copied into memory and
//! reach the backend later, coalesced with their contiguous neighbours.
//!
//! # Components
//! - [`WriteBackManager`] - The buffering layer and its public operations
//! - [`Session`] - Per-open-file buffered run, deferred error and refcount
//! - [`SessionRef`] - RAII reference to a session
//! - [`SessionRegistry`] - Handle to session map
//! - [`Page`] - One buffered write
//! - [`WriteBackStats`] - Performance statistics

mod flush;
mod page;
mod registry;
mod session;
mod session_ref;
mod stats;
mod write_back_manager;

pub use flush::FlushReason;
pub use page::Page;
pub use registry::SessionRegistry;
pub use session::Session;
pub use session_ref::SessionRef;
pub use stats::{StatsSnapshot, WriteBackStats};
pub use write_back_manager::WriteBackManager;
