use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use docchat_core::ChatEvent;

use crate::{ChatSession, DocChat, RagError, SessionEvent, SessionHandle};

/// Live sessions keyed by id, shared by the transports.
#[derive(Clone)]
pub struct SessionManager {
    app: DocChat,
    sessions: Arc<RwLock<HashMap<String, SessionHandle>>>,
}

impl SessionManager {
    pub fn new(app: DocChat) -> Self {
        Self {
            app,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn app(&self) -> &DocChat {
        &self.app
    }

    /// Creates and starts a session, returning its id and the start events.
    pub async fn create(&self) -> Result<(String, Vec<ChatEvent>), RagError> {
        let id = Uuid::new_v4().to_string();
        let handle = SessionHandle::spawn(ChatSession::new(id.clone(), self.app.clone()));
        let events = handle.dispatch(SessionEvent::Start).await?;
        self.sessions.write().await.insert(id.clone(), handle);
        Ok((id, events))
    }

    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Ends and forgets a session. `None` when the id is unknown.
    pub async fn end(&self, id: &str) -> Option<Result<Vec<ChatEvent>, RagError>> {
        let handle = self.sessions.write().await.remove(id)?;
        Some(handle.end().await)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Ends every session; used on shutdown.
    pub async fn end_all(&self) {
        let handles: Vec<SessionHandle> = self.sessions.write().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            if let Err(err) = handle.end().await {
                tracing::debug!(session_id = %handle.id(), error = %err, "session already gone");
            }
        }
    }
}
