//! Session registry - maps backend handles to their sessions.

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error};

use crate::buffer::{Session, SessionRef, WriteBackStats};
use crate::common::{Error, FileHandle, Result};

/// Handle → session association.
///
/// The map owns each session's creation reference: a registered session is
/// never destroyed, and removing the entry drops that reference.
///
/// # Thread Safety
/// `sessions` is behind a `RwLock`: lookups (every operation) share it,
/// only open/create and release take it exclusively. Session references are
/// never dropped while the map lock is held, since the last drop takes the
/// session lock.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<FileHandle, SessionRef>>,
    stats: Arc<WriteBackStats>,
}

impl SessionRegistry {
    pub fn new(stats: Arc<WriteBackStats>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            stats,
        }
    }

    /// Register a fresh session for `handle`, taking its creation reference.
    ///
    /// # Errors
    /// `Error::HandleInUse` if `handle` already has a session.
    pub fn associate(&self, handle: FileHandle, session: Arc<Session>) -> Result<()> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&handle) {
            error!(handle = %handle, "backend returned a handle that is already registered");
            return Err(Error::HandleInUse(handle));
        }

        sessions.insert(handle, SessionRef::new(session));
        self.stats.sessions_created.fetch_add(1, Ordering::Relaxed);
        debug!(handle = %handle, "session registered");
        Ok(())
    }

    /// Take a reference on the session registered for `handle`.
    ///
    /// # Errors
    /// `Error::UnregisteredHandle` if nothing is registered for `handle`.
    pub fn lookup(&self, handle: FileHandle) -> Result<SessionRef> {
        match self.sessions.read().get(&handle) {
            Some(session) => Ok(session.clone()),
            None => {
                error!(handle = %handle, "operation on a handle with no registered session");
                Err(Error::UnregisteredHandle(handle))
            }
        }
    }

    /// Remove the association and drop its creation reference.
    ///
    /// Returns false if nothing was registered for `handle`.
    pub fn remove(&self, handle: FileHandle) -> bool {
        let removed = self.sessions.write().remove(&handle);
        match removed {
            Some(creation_ref) => {
                debug!(handle = %handle, "session unregistered");
                drop(creation_ref);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, handle: FileHandle) -> bool {
        self.sessions.read().contains_key(&handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Take a reference on every registered session.
    pub fn sessions(&self) -> Vec<SessionRef> {
        self.sessions.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SessionRegistry {
        SessionRegistry::new(Arc::new(WriteBackStats::new()))
    }

    fn session(registry: &SessionRegistry, id: u64) -> Arc<Session> {
        Session::new(FileHandle::new(id), Arc::clone(&registry.stats))
    }

    #[test]
    fn test_associate_and_lookup() {
        let registry = registry();
        let s = session(&registry, 1);

        registry.associate(FileHandle::new(1), Arc::clone(&s)).unwrap();
        assert_eq!(s.refcount(), 1);
        assert_eq!(registry.len(), 1);

        let found = registry.lookup(FileHandle::new(1)).unwrap();
        assert!(Arc::ptr_eq(found.session(), &s));
        assert_eq!(s.refcount(), 2);

        drop(found);
        assert_eq!(s.refcount(), 1);
        assert_eq!(registry.stats.snapshot().sessions_created, 1);
    }

    #[test]
    fn test_associate_duplicate() {
        let registry = registry();
        registry
            .associate(FileHandle::new(1), session(&registry, 1))
            .unwrap();

        let result = registry.associate(FileHandle::new(1), session(&registry, 1));
        assert!(matches!(result, Err(Error::HandleInUse(h)) if h == FileHandle::new(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_unregistered() {
        let registry = registry();
        let result = registry.lookup(FileHandle::new(42));
        assert!(matches!(result, Err(Error::UnregisteredHandle(_))));
    }

    #[test]
    fn test_remove_drops_creation_reference() {
        let registry = registry();
        let s = session(&registry, 1);
        registry.associate(FileHandle::new(1), Arc::clone(&s)).unwrap();

        assert!(registry.remove(FileHandle::new(1)));
        assert!(s.is_destroyed());
        assert!(registry.is_empty());
        assert!(!registry.contains(FileHandle::new(1)));

        // Second remove finds nothing
        assert!(!registry.remove(FileHandle::new(1)));
    }

    #[test]
    fn test_remove_with_outstanding_reference() {
        let registry = registry();
        let s = session(&registry, 1);
        registry.associate(FileHandle::new(1), Arc::clone(&s)).unwrap();

        let held = registry.lookup(FileHandle::new(1)).unwrap();
        assert!(registry.remove(FileHandle::new(1)));

        // Unreachable through the registry but still alive
        assert!(registry.lookup(FileHandle::new(1)).is_err());
        assert!(!s.is_destroyed());

        drop(held);
        assert!(s.is_destroyed());
        assert_eq!(registry.stats.snapshot().live_sessions(), 0);
    }

    #[test]
    fn test_sessions_snapshot() {
        let registry = registry();
        for id in 0..4 {
            registry
                .associate(FileHandle::new(id), session(&registry, id))
                .unwrap();
        }

        let all = registry.sessions();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|s| s.refcount() == 2));
    }
}
