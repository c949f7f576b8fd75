//! Session history persistence.

use crate::agent::session::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    #[error("session store rejected write for {session_id}: {reason}")]
    Write { session_id: String, reason: String },
}

/// Durable message history, keyed by session id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn append(&self, session_id: &str, message: Message) -> Result<(), StoreError>;

    /// Full history, oldest first. Unknown sessions have an empty history.
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Forget a session entirely
    async fn clear(&self, session_id: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Vec<Message>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn append(&self, session_id: &str, message: Message) -> Result<(), StoreError> {
        self.sessions
            .write()
            .await
            .entry(session_id.to_string())
            .or_default()
            .push(message);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn clear(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_load_clear() {
        let store = InMemorySessionStore::new();
        assert!(store.load("s1").await.unwrap().is_empty());

        store.append("s1", Message::user("one")).await.unwrap();
        store.append("s1", Message::user("two")).await.unwrap();
        store.append("s2", Message::user("other")).await.unwrap();

        let history = store.load("s1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "two");
        assert_eq!(store.session_ids().await, vec!["s1", "s2"]);

        store.clear("s1").await.unwrap();
        assert!(store.load("s1").await.unwrap().is_empty());
        assert_eq!(store.session_ids().await, vec!["s2"]);
    }
}
