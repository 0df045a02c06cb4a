#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use parley_client::{Backend, ChatSession, ChatSnapshot, ClientConfig, ClientError, MemoryBackend};
use parley_types::{ConversationHandle, ConversationView, Identity, Message, MessageId};
use tokio::sync::{Notify, watch};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_client=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

pub fn id(s: &str) -> Identity {
    s.parse().unwrap()
}

pub fn test_config() -> Arc<ClientConfig> {
    Arc::new(ClientConfig {
        probe_bound: 10,
        ..ClientConfig::default()
    })
}

/// Wait (on the paused clock) until the session's snapshot satisfies `pred`.
pub async fn wait_for<B: Backend>(
    session: &ChatSession<B>,
    pred: impl Fn(&ChatSnapshot) -> bool,
) -> ChatSnapshot {
    let mut rx = session.subscribe();
    let snapshot = tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| pred(s)))
        .await
        .expect("timed out waiting for snapshot")
        .expect("session driver stopped");
    snapshot.clone()
}

pub fn contents(snapshot: &ChatSnapshot) -> Vec<String> {
    snapshot.messages.iter().map(|m| m.content.clone()).collect()
}

/// Wraps a memory backend so message fetches can be held mid-flight.
pub struct GatedBackend {
    inner: MemoryBackend,
    held: watch::Sender<bool>,
    entered: Notify,
}

impl GatedBackend {
    pub fn new(inner: MemoryBackend) -> Self {
        let (held, _) = watch::channel(false);
        Self {
            inner,
            held,
            entered: Notify::new(),
        }
    }

    pub fn hold(&self) {
        self.held.send_replace(true);
    }

    pub fn release(&self) {
        self.held.send_replace(false);
    }

    /// Resolves once a fetch is parked behind the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }
}

impl Backend for GatedBackend {
    async fn fetch_conversation(&self, handle: ConversationHandle) -> Result<ConversationView, ClientError> {
        self.inner.fetch_conversation(handle).await
    }

    async fn fetch_messages_since(
        &self,
        handle: ConversationHandle,
        after: Option<MessageId>,
    ) -> Result<Vec<Message>, ClientError> {
        let mut held = self.held.subscribe();
        let is_held = *held.borrow_and_update();
        if is_held {
            self.entered.notify_one();
            let _ = held.wait_for(|h| !*h).await;
        }
        self.inner.fetch_messages_since(handle, after).await
    }

    async fn send_message(&self, recipient: &Identity, content: &str) -> Result<(), ClientError> {
        self.inner.send_message(recipient, content).await
    }
}
