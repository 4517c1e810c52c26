//! Session registry: admission control and lookup by session id.
//!
//! Entries are either *pending* (id handed out during the handshake, no
//! parameters yet) or *active*. Both count against the capacity, so the
//! check made when a connection opens is the one that protects the cap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tracing::{debug, info};

use crate::params::GenerationParams;
use crate::session::{Session, SessionId};

/// Default cap on concurrent sessions.
pub const DEFAULT_MAX_SESSIONS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Server is full")]
    ServerFull { capacity: usize },

    #[error("Session not found: {0}")]
    UnknownSession(SessionId),

    #[error("Session already active: {0}")]
    AlreadyActive(SessionId),
}

enum Entry {
    Pending,
    Active(Arc<Session>),
}

/// Process-wide map of live sessions, created once at start-up and shared by
/// handle.
pub struct SessionRegistry {
    max_sessions: usize,
    entries: Mutex<HashMap<SessionId, Entry>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SESSIONS)
    }
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            max_sessions,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<SessionId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configured session cap.
    pub fn capacity(&self) -> usize {
        self.max_sessions
    }

    /// Admit a session with its parameters in one step.
    pub fn admit(&self, params: GenerationParams) -> Result<SessionId, RegistryError> {
        let mut entries = self.entries();
        if entries.len() >= self.max_sessions {
            debug!(capacity = self.max_sessions, "Admission rejected");
            return Err(RegistryError::ServerFull {
                capacity: self.max_sessions,
            });
        }

        let id = fresh_id(&entries);
        entries.insert(id, Entry::Active(Arc::new(Session::new(id, params))));
        info!(session_id = %id, live = entries.len(), "Session admitted");
        Ok(id)
    }

    /// Hold a place for a session whose parameters have not arrived yet.
    pub fn reserve(&self) -> Result<SessionId, RegistryError> {
        let mut entries = self.entries();
        if entries.len() >= self.max_sessions {
            debug!(capacity = self.max_sessions, "Reservation rejected");
            return Err(RegistryError::ServerFull {
                capacity: self.max_sessions,
            });
        }

        let id = fresh_id(&entries);
        entries.insert(id, Entry::Pending);
        debug!(session_id = %id, live = entries.len(), "Session reserved");
        Ok(id)
    }

    /// Bind parameters to a reserved session, making it visible to
    /// [`lookup`](Self::lookup).
    pub fn activate(
        &self,
        id: SessionId,
        params: GenerationParams,
    ) -> Result<Arc<Session>, RegistryError> {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(&id) else {
            return Err(RegistryError::UnknownSession(id));
        };
        if matches!(entry, Entry::Active(_)) {
            return Err(RegistryError::AlreadyActive(id));
        }

        let session = Arc::new(Session::new(id, params));
        *entry = Entry::Active(session.clone());
        info!(session_id = %id, "Session activated");
        Ok(session)
    }

    /// Look up an active session.
    pub fn lookup(&self, id: &SessionId) -> Option<Arc<Session>> {
        match self.entries().get(id) {
            Some(Entry::Active(session)) => Some(session.clone()),
            _ => None,
        }
    }

    /// Drop a session and close its frame slot. Removing an unknown id is a
    /// no-op; returns whether anything was removed.
    pub fn remove(&self, id: &SessionId) -> bool {
        let removed = self.entries().remove(id);
        match removed {
            Some(Entry::Active(session)) => {
                session.slot().close();
                info!(session_id = %id, frames = session.frames_received(), "Session removed");
                true
            }
            Some(Entry::Pending) => {
                debug!(session_id = %id, "Pending session released");
                true
            }
            None => false,
        }
    }

    /// Remove every session, closing their slots. Used on shutdown.
    pub fn clear(&self) -> usize {
        let drained: Vec<Entry> = self.entries().drain().map(|(_, entry)| entry).collect();
        let count = drained.len();
        for entry in drained {
            if let Entry::Active(session) = entry {
                session.slot().close();
            }
        }
        if count > 0 {
            info!(sessions = count, "Registry cleared");
        }
        count
    }

    /// Number of live sessions, pending ones included. Advisory only.
    pub fn count(&self) -> usize {
        self.entries().len()
    }
}

fn fresh_id(entries: &HashMap<SessionId, Entry>) -> SessionId {
    loop {
        let id = SessionId::new();
        if !entries.contains_key(&id) {
            return id;
        }
    }
}
