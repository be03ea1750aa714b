//! RAII reference to a session.
//!
//! A [`SessionRef`] is one counted reference to a [`Session`]:
//! - Creating one increments the session's refcount
//! - Cloning takes another reference
//! - Dropping releases it, destroying the session on the last release
//!
//! Every asynchronous hold on a session (the registry's creation reference, an
//! in-flight flush, a forwarded backend call) is a `SessionRef`, so each hold
//! is released exactly once on every exit path, including panics and
//! cancelled tasks.

use std::ops::Deref;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, warn};

use super::session::{Session, SessionState};

/// Counted reference to a session.
///
/// # Example
/// ```ignore
/// let session = registry.lookup(handle)?;   // refcount + 1
/// let hold = session.clone();               // refcount + 1
/// drop(hold);                               // refcount - 1
/// // session drops here; if it was the last reference the session is destroyed
/// ```
pub struct SessionRef {
    session: Arc<Session>,
}

impl SessionRef {
    /// Take a reference on `session`.
    pub(crate) fn new(session: Arc<Session>) -> Self {
        session.lock().acquire();
        Self { session }
    }

    /// Take a reference while the caller already holds the session lock.
    pub(crate) fn acquire_locked(session: &Arc<Session>, state: &mut SessionState) -> Self {
        state.acquire();
        Self {
            session: Arc::clone(session),
        }
    }

    /// The underlying session.
    ///
    /// Cloning the `Arc` keeps the memory alive but does not count as a
    /// reference; use it to observe a session without delaying its destruction.
    #[inline]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Clone for SessionRef {
    fn clone(&self) -> Self {
        SessionRef::new(Arc::clone(&self.session))
    }
}

impl Deref for SessionRef {
    type Target = Session;

    #[inline]
    fn deref(&self) -> &Session {
        &self.session
    }
}

impl Drop for SessionRef {
    fn drop(&mut self) {
        let leftovers = {
            let mut state = self.session.lock();
            if state.release() > 0 {
                return;
            }
            state.destroy()
        };

        let handle = self.session.handle();
        self.session
            .stats()
            .sessions_destroyed
            .fetch_add(1, Ordering::Relaxed);

        if !leftovers.is_empty() {
            let bytes: usize = leftovers.iter().map(|p| p.len()).sum();
            warn!(
                handle = %handle,
                pages = leftovers.len(),
                bytes,
                "session destroyed with buffered pages, dropping them"
            );
        }
        debug!(handle = %handle, "session destroyed");
    }
}

impl std::fmt::Debug for SessionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionRef").field(&self.session).finish()
    }
}
