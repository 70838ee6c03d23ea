//! Shared table of active sessions.
//!
//! One mutex serializes every insert, remove, and snapshot. Critical sections
//! are plain map operations and never await, so a std mutex is enough and the
//! drop guard can release a session synchronously.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tokio::io::AsyncWrite;
use tracing::debug;

use crate::session::{Session, SessionId};

#[derive(Default)]
struct Table {
    // Ids are handed out under the lock, so map order is registration order.
    sessions: BTreeMap<SessionId, Arc<Session>>,
    last_id: u64,
}

#[derive(Default)]
pub struct Registry {
    table: Mutex<Table>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates and inserts a session, returning the sessions registered
    /// before it.
    ///
    /// Both happen under one lock, so for any two sessions exactly one of them
    /// appears in the other's list. The returned [`Registration`] removes the
    /// session again when dropped.
    pub fn register<W>(
        self: &Arc<Self>,
        name: String,
        peer: Option<SocketAddr>,
        writer: W,
    ) -> (Registration, Vec<Arc<Session>>)
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (session, earlier) = {
            let mut table = self.lock();
            table.last_id += 1;
            let id = SessionId::new(table.last_id);
            let session = Arc::new(Session::new(id, name, peer, writer));
            let earlier = table.sessions.values().cloned().collect();
            table.sessions.insert(id, Arc::clone(&session));
            (session, earlier)
        };
        debug!(session = %session.id(), name = %session.name(), "session registered");

        let registration = Registration {
            registry: Arc::clone(self),
            session,
        };
        (registration, earlier)
    }

    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.lock().sessions.remove(&id)
    }

    /// Copies the current sessions in registration order.
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.lock().sessions.values().cloned().collect()
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().sessions.contains_key(&id)
    }

    pub fn names(&self) -> Vec<String> {
        self.lock()
            .sessions
            .values()
            .map(|session| session.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps a session registered for as long as it is alive.
///
/// Dropping it marks the session disconnected and removes it from the
/// registry, on every exit path of the owning handler.
pub struct Registration {
    registry: Arc<Registry>,
    session: Arc<Session>,
}

impl Registration {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.session.mark_disconnected();
        if self.registry.remove(self.session.id()).is_some() {
            debug!(session = %self.session.id(), "session removed");
        }
    }
}
