//! In-process ledger.
//!
//! Behaves like the remote ledger as far as the chat core can observe:
//! conversations are numbered from 0 in creation order, the first send between
//! two identities creates their conversation, and only participants may read
//! a conversation. A visibility lag (measured on the tokio clock) delays when
//! a freshly created conversation becomes fetchable, which is what makes the
//! settle-then-resolve path necessary against the real thing.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use parley_types::{ConversationHandle, ConversationView, Identity, Message, MessageId};
use tokio::time::Instant;
use tracing::debug;

use crate::backend::Backend;
use crate::error::{ClientError, Result};

/// Number of calls received per operation, across all connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub fetch_conversation: usize,
    pub fetch_messages_since: usize,
    pub send_message: usize,
}

struct StoredConversation {
    participants: BTreeSet<Identity>,
    messages: Vec<Message>,
    visible_at: Instant,
}

#[derive(Default)]
struct LedgerState {
    conversations: Vec<StoredConversation>,
    next_message_id: u64,
    visibility_lag: Duration,
    unavailable: bool,
    calls: CallCounts,
}

impl LedgerState {
    fn readable(
        &self,
        handle: ConversationHandle,
        caller: &Identity,
    ) -> Result<&StoredConversation> {
        let conversation = usize::try_from(handle.0)
            .ok()
            .and_then(|idx| self.conversations.get(idx))
            .ok_or(ClientError::NotFoundOrUnauthorized(handle))?;

        if Instant::now() < conversation.visible_at || !conversation.participants.contains(caller) {
            return Err(ClientError::NotFoundOrUnauthorized(handle));
        }
        Ok(conversation)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(ClientError::Unavailable("memory ledger switched off".into()));
        }
        Ok(())
    }

    fn find_or_create(&mut self, a: &Identity, b: &Identity) -> usize {
        let pair: BTreeSet<Identity> = [a.clone(), b.clone()].into_iter().collect();
        if let Some(idx) = self.conversations.iter().position(|c| c.participants == pair) {
            return idx;
        }

        self.conversations.push(StoredConversation {
            participants: pair,
            messages: Vec::new(),
            visible_at: Instant::now() + self.visibility_lag,
        });
        let idx = self.conversations.len() - 1;
        debug!(handle = idx, "memory ledger created conversation");
        idx
    }
}

/// Shared ledger state. Hand out per-user connections with [`MemoryLedger::connect`].
#[derive(Clone, Default)]
pub struct MemoryLedger {
    state: Arc<Mutex<LedgerState>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend acting on behalf of `caller`.
    pub fn connect(&self, caller: Identity) -> MemoryBackend {
        MemoryBackend {
            caller,
            ledger: self.clone(),
        }
    }

    /// Create (or find) the conversation between `a` and `b` without sending
    /// anything. Visible immediately, regardless of the configured lag.
    pub fn open_conversation(&self, a: &Identity, b: &Identity) -> ConversationHandle {
        let mut state = self.lock();
        let lag = std::mem::take(&mut state.visibility_lag);
        let idx = state.find_or_create(a, b);
        state.visibility_lag = lag;
        ConversationHandle(idx as u64)
    }

    /// Delay before conversations created by a send become fetchable.
    pub fn set_visibility_lag(&self, lag: Duration) {
        self.lock().visibility_lag = lag;
    }

    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls
    }

    pub fn conversation_count(&self) -> usize {
        self.lock().conversations.len()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        // Nothing panics while holding the guard, so a poisoned lock still
        // holds consistent state.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// One user's connection to a [`MemoryLedger`].
#[derive(Clone)]
pub struct MemoryBackend {
    caller: Identity,
    ledger: MemoryLedger,
}

impl MemoryBackend {
    pub fn caller(&self) -> &Identity {
        &self.caller
    }

    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }
}

impl Backend for MemoryBackend {
    async fn fetch_conversation(&self, handle: ConversationHandle) -> Result<ConversationView> {
        let mut state = self.ledger.lock();
        state.calls.fetch_conversation += 1;
        state.ensure_available()?;

        let conversation = state.readable(handle, &self.caller)?;
        Ok(ConversationView {
            participants: conversation.participants.clone(),
            messages: conversation.messages.clone(),
        })
    }

    async fn fetch_messages_since(
        &self,
        handle: ConversationHandle,
        after: Option<MessageId>,
    ) -> Result<Vec<Message>> {
        let mut state = self.ledger.lock();
        state.calls.fetch_messages_since += 1;
        state.ensure_available()?;

        let conversation = state.readable(handle, &self.caller)?;
        Ok(conversation
            .messages
            .iter()
            .filter(|m| after.is_none_or(|after| m.id > after))
            .cloned()
            .collect())
    }

    async fn send_message(&self, recipient: &Identity, content: &str) -> Result<()> {
        let mut state = self.ledger.lock();
        state.calls.send_message += 1;
        state.ensure_available()?;

        let idx = state.find_or_create(&self.caller, recipient);
        let id = MessageId(state.next_message_id);
        state.next_message_id += 1;

        state.conversations[idx].messages.push(Message {
            id,
            sender: self.caller.clone(),
            content: content.to_string(),
            timestamp: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        });
        Ok(())
    }
}
