use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::session::Session;
use crate::error::RecorderError;
use crate::voice::GuildKey;

/// Active sessions, one per guild.
///
/// The lock is only held for map operations, never across voice or encoder I/O.
#[derive(Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<GuildKey, Arc<Session>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `session`, failing if its guild already has one. The existing entry is untouched.
    pub async fn create(&self, session: Session) -> Result<Arc<Session>, RecorderError> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.key()) {
            return Err(RecorderError::AlreadyRecording);
        }

        let session = Arc::new(session);
        sessions.insert(session.key(), Arc::clone(&session));
        Ok(session)
    }

    pub async fn get(&self, key: GuildKey) -> Option<Arc<Session>> {
        self.sessions.read().await.get(&key).cloned()
    }

    pub async fn contains(&self, key: GuildKey) -> bool {
        self.sessions.read().await.contains_key(&key)
    }

    pub async fn remove(&self, key: GuildKey) -> Option<Arc<Session>> {
        self.sessions.write().await.remove(&key)
    }

    /// Remove the entry for `session`'s guild only if it is still this exact session.
    pub async fn remove_if(&self, session: &Arc<Session>) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&session.key()) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(&session.key());
                true
            }
            _ => false,
        }
    }

    /// True while `session` is the registered session for its guild.
    pub async fn is_current(&self, session: &Arc<Session>) -> bool {
        self.sessions
            .read()
            .await
            .get(&session.key())
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }

    pub async fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
