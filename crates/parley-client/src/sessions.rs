use std::collections::HashMap;
use std::sync::Arc;

use parley_types::Identity;
use tracing::debug;

use crate::backend::Backend;
use crate::config::ClientConfig;
use crate::session::ChatSession;

/// Open chat sessions keyed by recipient.
///
/// Each session is an independent state machine with its own log, cursor and
/// poll task; nothing is shared between recipients.
pub struct ChatSessions<B> {
    backend: Arc<B>,
    config: Arc<ClientConfig>,
    sessions: HashMap<Identity, ChatSession<B>>,
}

impl<B: Backend> ChatSessions<B> {
    pub fn new(backend: Arc<B>, config: ClientConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
            sessions: HashMap::new(),
        }
    }

    /// The live session for `recipient`, opening one if needed.
    pub fn open(&mut self, recipient: &Identity) -> ChatSession<B> {
        if let Some(session) = self.sessions.get(recipient) {
            if !session.is_closed() {
                return session.clone();
            }
        }

        let session = ChatSession::open(self.backend.clone(), recipient.clone(), self.config.clone());
        debug!(%recipient, session = %session.id(), "opened chat session");
        self.sessions.insert(recipient.clone(), session.clone());
        session
    }

    pub fn get(&self, recipient: &Identity) -> Option<ChatSession<B>> {
        self.sessions
            .get(recipient)
            .filter(|s| !s.is_closed())
            .cloned()
    }

    /// Close and forget the session for `recipient`. Returns whether one was
    /// open.
    pub fn close(&mut self, recipient: &Identity) -> bool {
        match self.sessions.remove(recipient) {
            Some(session) => {
                let was_open = !session.is_closed();
                session.close();
                was_open
            }
            None => false,
        }
    }

    /// Close `session`, but only if it is still the one registered for its
    /// recipient. A stale handle cannot tear down a newer session.
    pub fn release(&mut self, session: &ChatSession<B>) -> bool {
        let current = self
            .sessions
            .get(session.recipient())
            .is_some_and(|s| s.id() == session.id());

        session.close();
        if current {
            self.sessions.remove(session.recipient());
        }
        current
    }

    pub fn close_all(&mut self) {
        for (_, session) in self.sessions.drain() {
            session.close();
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.values().filter(|s| !s.is_closed()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B> Drop for ChatSessions<B> {
    fn drop(&mut self) {
        for session in self.sessions.values() {
            session.close();
        }
    }
}
