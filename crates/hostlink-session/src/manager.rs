//! Session manager for the sessions of one connector.

use std::{collections::HashMap, sync::Arc};

use hostlink_core::{HostConnector, HostError};
use tokio::sync::RwLock;

use crate::{Session, SessionOptions};

/// Sessions sharing one connector, keyed by caller-assigned id.
///
/// Ids are only unique within a manager. Disposed sessions are dropped from
/// the map by `dispose_all`; a session disposed directly stays until then and
/// `get_or_create` replaces it.
pub struct SessionManager {
    connector: Arc<dyn HostConnector>,
    options: SessionOptions,
    sessions: RwLock<HashMap<i64, Session>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(connector: Arc<dyn HostConnector>) -> Self {
        Self::with_options(connector, SessionOptions::default())
    }

    #[must_use]
    pub fn with_options(connector: Arc<dyn HostConnector>, options: SessionOptions) -> Self {
        Self {
            connector,
            options,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Get the session with `id`, creating it if missing or disposed.
    pub async fn get_or_create(&self, id: i64) -> Session {
        if let Some(session) = self.get(id).await {
            return session;
        }

        let mut sessions = self.sessions.write().await;
        match sessions.get(&id) {
            Some(session) if !session.is_disposed() => session.clone(),
            _ => {
                let session = Session::with_options(id, Arc::clone(&self.connector), self.options.clone());
                tracing::debug!(session_id = id, "Created session");
                sessions.insert(id, session.clone());
                session
            }
        }
    }

    /// Get a live session.
    pub async fn get(&self, id: i64) -> Option<Session> {
        self.sessions
            .read()
            .await
            .get(&id)
            .filter(|s| !s.is_disposed())
            .cloned()
    }

    /// Ids of live sessions, ascending.
    pub async fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, s)| !s.is_disposed())
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Stop every running host. Sessions stay usable.
    pub async fn stop_all(&self) {
        let sessions: Vec<Session> = self.sessions.read().await.values().cloned().collect();
        for session in sessions {
            if let Err(e) = session.stop_host() {
                tracing::debug!(session_id = session.id(), "Skipping stop: {e}");
            }
        }
    }

    /// Dispose every session and forget them.
    pub async fn dispose_all(&self) {
        let sessions: Vec<Session> = self.sessions.write().await.drain().map(|(_, s)| s).collect();
        for session in sessions {
            match session.dispose() {
                Ok(()) | Err(HostError::Disposed) => {}
                Err(e) => tracing::warn!(session_id = session.id(), "Failed to dispose session: {e}"),
            }
        }
    }
}
