//! Live turn sessions keyed by session id.
//!
//! At most one session is live per id. A newer connection for the same id replaces the
//! older one, which is shut down; removal is by connection, so the older connection's
//! cleanup never evicts its replacement.

use crate::error::{VoiceError, VoiceResult};
use crate::turn::TurnSessionHandle;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Default, Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, TurnSessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, shutting down any previous one with the same id.
    pub fn insert(&self, handle: TurnSessionHandle) {
        if let Some(previous) = self.sessions.insert(handle.session_id().to_string(), handle) {
            info!(
                session_id = %previous.session_id(),
                connection_id = %previous.connection_id(),
                "live session replaced by a new connection"
            );
            previous.shutdown();
        }
    }

    pub fn get(&self, session_id: &str) -> Option<TurnSessionHandle> {
        self.sessions.get(session_id).map(|h| h.value().clone())
    }

    pub fn remove(&self, session_id: &str) -> Option<TurnSessionHandle> {
        self.sessions.remove(session_id).map(|(_, h)| h)
    }

    /// Remove `handle`'s entry if it is still the registered connection for its id.
    pub fn release(&self, handle: &TurnSessionHandle) -> bool {
        self.sessions
            .remove_if(handle.session_id(), |_, current| {
                current.connection_id() == handle.connection_id()
            })
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub async fn start_session(&self, session_id: &str) -> VoiceResult<()> {
        self.require(session_id)?.start().await
    }

    pub fn stop_session(&self, session_id: &str) -> VoiceResult<()> {
        self.require(session_id)?.stop();
        Ok(())
    }

    fn require(&self, session_id: &str) -> VoiceResult<TurnSessionHandle> {
        self.get(session_id)
            .ok_or_else(|| VoiceError::ChannelUnavailable(format!("no session {}", session_id)))
    }
}
