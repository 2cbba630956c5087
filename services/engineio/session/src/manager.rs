//! Session registry.
//!
//! The registry owns every live session. Its lock is the single-writer
//! boundary: all session mutation happens while it is held, and no
//! application callback is ever invoked under it.

use std::collections::HashMap;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::session::{Session, Sid};

/// Live sessions keyed by id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Sid, Session>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock the session table
    pub async fn lock(&self) -> MutexGuard<'_, HashMap<Sid, Session>> {
        self.sessions.lock().await
    }

    /// Register a session; gives it back if the id is already taken
    pub async fn insert(&self, session: Session) -> Result<(), Session> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(session.id()) {
            return Err(session);
        }
        debug!("Registered session {}", session.id());
        sessions.insert(session.id().clone(), session);
        Ok(())
    }

    /// Run `f` against a session while holding the lock
    pub async fn with_session<R>(&self, id: &Sid, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let mut sessions = self.sessions.lock().await;
        sessions.get_mut(id).map(f)
    }

    /// Remove a session and tear down what it owns
    pub async fn remove(&self, id: &Sid) -> Option<Session> {
        let mut session = self.sessions.lock().await.remove(id)?;
        session.shutdown();
        debug!("Unregistered session {}", id);
        Some(session)
    }

    /// Remove every session matching `predicate`
    pub async fn remove_where(&self, mut predicate: impl FnMut(&Session) -> bool) -> Vec<Session> {
        let mut sessions = self.sessions.lock().await;
        let ids: Vec<Sid> = sessions
            .values()
            .filter(|session| predicate(*session))
            .map(|session| session.id().clone())
            .collect();

        ids.iter()
            .filter_map(|id| sessions.remove(id))
            .map(|mut session| {
                session.shutdown();
                session
            })
            .collect()
    }

    /// Whether a session with this id is registered
    pub async fn contains(&self, id: &Sid) -> bool {
        self.sessions.lock().await.contains_key(id)
    }

    /// Ids of all live sessions
    pub async fn ids(&self) -> Vec<Sid> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Number of live sessions
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Whether no session is registered
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
