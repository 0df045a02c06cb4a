use std::sync::Arc;

use parley_types::{ConversationHandle, ConversationView, Identity};
use tracing::{debug, info, trace};

use crate::backend::Backend;
use crate::config::ClientConfig;
use crate::error::ClientError;

/// A conversation found by probing, with the snapshot that proved membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub handle: ConversationHandle,
    pub view: ConversationView,
}

/// Maps a recipient to the ledger's conversation handle.
///
/// The ledger has no participant index, so this walks a bounded window of
/// handles in increasing order and stops at the first conversation that lists
/// the recipient. Failed probes count as "not this one".
pub struct ConversationResolver<B> {
    backend: Arc<B>,
    config: Arc<ClientConfig>,
}

impl<B> Clone for ConversationResolver<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            config: self.config.clone(),
        }
    }
}

impl<B: Backend> ConversationResolver<B> {
    pub fn new(backend: Arc<B>, config: Arc<ClientConfig>) -> Self {
        Self { backend, config }
    }

    /// One pass over the probe window. `None` means no conversation with
    /// `recipient` is visible yet, which is a normal state.
    pub async fn discover(&self, recipient: &Identity) -> Option<Discovered> {
        let start = self.config.probe_start;
        let end = start.saturating_add(self.config.probe_bound);

        for raw in start..end {
            let handle = ConversationHandle(raw);
            match self.backend.fetch_conversation(handle).await {
                Ok(view) if view.has_participant(recipient) => {
                    debug!(%recipient, %handle, "conversation discovered");
                    return Some(Discovered { handle, view });
                }
                Ok(_) => trace!(%handle, "probe: recipient not a participant"),
                Err(ClientError::NotFoundOrUnauthorized(_)) => trace!(%handle, "probe: no access"),
                Err(e) => debug!(%handle, error = %e, "probe failed, skipping"),
            }
        }

        debug!(%recipient, probed = self.config.probe_bound, "no conversation found");
        None
    }

    /// Look for the conversation a send may just have created.
    ///
    /// Waits the settle delay, then runs up to `resolve_attempts` discovery
    /// passes, doubling the pause between them.
    pub async fn discover_after_send(&self, recipient: &Identity) -> Option<Discovered> {
        let attempts = self.config.resolve_attempts.max(1);
        let mut pause = self.config.settle_delay;

        for attempt in 1..=attempts {
            tokio::time::sleep(pause).await;

            if let Some(found) = self.discover(recipient).await {
                return Some(found);
            }

            debug!(%recipient, attempt, attempts, "conversation not visible yet");
            pause = pause.saturating_mul(2);
        }

        info!(%recipient, "conversation still unresolved after send");
        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::memory::MemoryLedger;

    fn id(s: &str) -> Identity {
        s.parse().unwrap()
    }

    fn config(probe_bound: u64) -> Arc<ClientConfig> {
        Arc::new(ClientConfig {
            probe_bound,
            ..ClientConfig::default()
        })
    }

    #[tokio::test]
    async fn skips_foreign_conversations_and_returns_first_match() {
        let ledger = MemoryLedger::new();
        ledger.open_conversation(&id("carol"), &id("dave"));
        ledger.open_conversation(&id("alice"), &id("carol"));
        let target = ledger.open_conversation(&id("alice"), &id("bob"));

        let alice = ledger.connect(id("alice"));
        alice.send_message(&id("bob"), "hello").await.unwrap();

        let resolver = ConversationResolver::new(Arc::new(alice), config(10));
        let found = resolver.discover(&id("bob")).await.unwrap();

        assert_eq!(found.handle, target);
        assert_eq!(found.view.messages.len(), 1);
        assert_eq!(found.view.messages[0].content, "hello");
        assert_eq!(ledger.calls().fetch_conversation, 3);
    }

    #[tokio::test]
    async fn gives_up_after_probe_bound() {
        let ledger = MemoryLedger::new();
        let resolver = ConversationResolver::new(Arc::new(ledger.connect(id("alice"))), config(25));

        assert!(resolver.discover(&id("bob")).await.is_none());
        assert_eq!(ledger.calls().fetch_conversation, 25);
    }

    #[tokio::test]
    async fn unavailable_probes_are_not_fatal() {
        let ledger = MemoryLedger::new();
        ledger.open_conversation(&id("alice"), &id("bob"));
        ledger.set_available(false);

        let resolver = ConversationResolver::new(Arc::new(ledger.connect(id("alice"))), config(4));
        assert!(resolver.discover(&id("bob")).await.is_none());
        assert_eq!(ledger.calls().fetch_conversation, 4);
    }

    #[tokio::test]
    async fn probe_window_honours_start() {
        let ledger = MemoryLedger::new();
        ledger.open_conversation(&id("alice"), &id("bob"));
        ledger.open_conversation(&id("alice"), &id("carol"));

        let cfg = Arc::new(ClientConfig {
            probe_start: 1,
            probe_bound: 5,
            ..ClientConfig::default()
        });
        let resolver = ConversationResolver::new(Arc::new(ledger.connect(id("alice"))), cfg);

        assert!(resolver.discover(&id("bob")).await.is_none());
        let found = resolver.discover(&id("carol")).await.unwrap();
        assert_eq!(found.handle, ConversationHandle(1));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_backoff_until_conversation_appears() {
        let ledger = MemoryLedger::new();
        // Visible only on the second pass: 500ms settle + 1000ms pause.
        ledger.set_visibility_lag(Duration::from_millis(1200));
        let alice = ledger.connect(id("alice"));
        alice.send_message(&id("bob"), "hi").await.unwrap();

        let resolver = ConversationResolver::new(Arc::new(alice), config(3));
        let started = tokio::time::Instant::now();
        let found = resolver.discover_after_send(&id("bob")).await.unwrap();

        assert_eq!(found.handle, ConversationHandle(0));
        assert_eq!(started.elapsed(), Duration::from_millis(1500));
        // Three misses on the first pass, a hit on the first probe of the second.
        assert_eq!(ledger.calls().fetch_conversation, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn single_attempt_matches_fixed_delay_behaviour() {
        let ledger = MemoryLedger::new();
        ledger.set_visibility_lag(Duration::from_secs(5));
        let alice = ledger.connect(id("alice"));
        alice.send_message(&id("bob"), "hi").await.unwrap();

        let cfg = Arc::new(ClientConfig {
            probe_bound: 2,
            resolve_attempts: 1,
            ..ClientConfig::default()
        });
        let resolver = ConversationResolver::new(Arc::new(alice), cfg);
        assert!(resolver.discover_after_send(&id("bob")).await.is_none());
        assert_eq!(ledger.calls().fetch_conversation, 2);
    }
}
