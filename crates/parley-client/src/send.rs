use std::sync::Arc;

use parley_types::Identity;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::{ClientError, Result};
use crate::resolver::{ConversationResolver, Discovered};

/// Message text that survived trimming. Never blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageContent(String);

impl MessageContent {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ClientError::InvalidInput("message content is blank"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// What a send did, and what the caller still has to reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Content was blank; nothing was sent.
    Blank,
    /// Sent into an already resolved conversation. The next poll surfaces it.
    Delivered,
    /// Sent, and the conversation it landed in has now been found.
    Resolved(Discovered),
    /// Sent, but the conversation is not visible yet.
    Unresolved,
}

/// Issues sends and works out afterwards whether the send created the
/// conversation.
///
/// Never inserts the sent message locally: the ledger's copy arrives through
/// the normal sync path, so there is no unconfirmed duplicate to reconcile.
pub struct SendCoordinator<B> {
    backend: Arc<B>,
    resolver: ConversationResolver<B>,
    in_flight: watch::Sender<usize>,
    cancel: CancellationToken,
}

impl<B: Backend> SendCoordinator<B> {
    pub fn new(backend: Arc<B>, resolver: ConversationResolver<B>) -> Self {
        let (in_flight, _) = watch::channel(0);
        Self {
            backend,
            resolver,
            in_flight,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop post-send reconciliation once `cancel` fires. A ledger command
    /// already on the wire still completes.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn is_sending(&self) -> bool {
        *self.in_flight.borrow() > 0
    }

    /// Number of sends not yet finished, reconciliation included. Callers
    /// use this to disable re-entrant submission.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.in_flight.subscribe()
    }

    /// Send `raw` to `recipient`. `resolved` tells whether the caller already
    /// holds a conversation handle for this recipient.
    pub async fn send(&self, recipient: &Identity, raw: &str, resolved: bool) -> Result<SendOutcome> {
        let Ok(content) = MessageContent::parse(raw) else {
            debug!(%recipient, "ignoring blank message");
            return Ok(SendOutcome::Blank);
        };

        let _in_flight = InFlight::enter(&self.in_flight);
        self.backend
            .send_message(recipient, content.as_str())
            .await
            .inspect_err(|e| warn!(%recipient, error = %e, "send failed"))?;
        debug!(%recipient, resolved, "message sent");

        if resolved {
            return Ok(SendOutcome::Delivered);
        }

        let found = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                debug!(%recipient, "reconciliation abandoned");
                None
            }
            found = self.resolver.discover_after_send(recipient) => found,
        };
        Ok(match found {
            Some(found) => SendOutcome::Resolved(found),
            None => SendOutcome::Unresolved,
        })
    }
}

/// Counts a send as in flight until dropped, including when the send future
/// is cancelled midway.
struct InFlight<'a>(&'a watch::Sender<usize>);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a watch::Sender<usize>) -> Self {
        counter.send_modify(|n| *n += 1);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use parley_types::ConversationHandle;

    use super::*;
    use crate::config::ClientConfig;
    use crate::memory::{MemoryBackend, MemoryLedger};

    fn id(s: &str) -> Identity {
        s.parse().unwrap()
    }

    fn coordinator(backend: MemoryBackend) -> SendCoordinator<MemoryBackend> {
        let backend = Arc::new(backend);
        let config = Arc::new(ClientConfig {
            probe_bound: 8,
            ..ClientConfig::default()
        });
        let resolver = ConversationResolver::new(backend.clone(), config);
        SendCoordinator::new(backend, resolver)
    }

    #[test]
    fn content_is_trimmed() {
        assert_eq!(MessageContent::parse("  hi there \n").unwrap().as_str(), "hi there");
        assert_eq!(
            MessageContent::parse(" \t "),
            Err(ClientError::InvalidInput("message content is blank"))
        );
    }

    #[tokio::test]
    async fn blank_content_never_reaches_the_ledger() {
        let ledger = MemoryLedger::new();
        let coordinator = coordinator(ledger.connect(id("alice")));
        let sending = coordinator.subscribe();

        let outcome = coordinator.send(&id("bob"), "   ", false).await.unwrap();

        assert_eq!(outcome, SendOutcome::Blank);
        assert_eq!(ledger.calls().send_message, 0);
        assert!(!sending.has_changed().unwrap());
        assert!(!coordinator.is_sending());
    }

    #[tokio::test(start_paused = true)]
    async fn first_send_resolves_created_conversation() {
        let ledger = MemoryLedger::new();
        ledger.set_visibility_lag(Duration::from_millis(300));
        let coordinator = coordinator(ledger.connect(id("alice")));

        let outcome = coordinator.send(&id("bob"), " hi ", false).await.unwrap();

        let SendOutcome::Resolved(found) = outcome else {
            panic!("expected resolution, got {outcome:?}");
        };
        assert_eq!(found.handle, ConversationHandle(0));
        assert_eq!(found.view.messages[0].content, "hi");
        assert!(!coordinator.is_sending());
    }

    #[tokio::test(start_paused = true)]
    async fn stays_sending_until_reconciliation_ends() {
        let ledger = MemoryLedger::new();
        ledger.set_visibility_lag(Duration::from_secs(600));
        let coordinator = coordinator(ledger.connect(id("alice")));

        let bob = id("bob");
        let send = coordinator.send(&bob, "hi", false);
        let check = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            coordinator.is_sending()
        };
        let (outcome, sending_while_settling) = tokio::join!(send, check);

        assert!(sending_while_settling);
        assert_eq!(outcome, Ok(SendOutcome::Unresolved));
        assert!(!coordinator.is_sending());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_reconciliation_but_not_the_send() {
        let ledger = MemoryLedger::new();
        let cancel = CancellationToken::new();
        let coordinator = coordinator(ledger.connect(id("alice"))).with_cancel(cancel.clone());

        let bob = id("bob");
        let send = coordinator.send(&bob, "hi", false);
        let stop = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel.cancel();
        };
        let (outcome, ()) = tokio::join!(send, stop);

        assert_eq!(outcome, Ok(SendOutcome::Unresolved));
        assert_eq!(ledger.calls().send_message, 1);
        assert_eq!(ledger.calls().fetch_conversation, 0);
        assert!(!coordinator.is_sending());
    }

    #[tokio::test]
    async fn resolved_send_skips_discovery() {
        let ledger = MemoryLedger::new();
        ledger.open_conversation(&id("alice"), &id("bob"));
        let coordinator = coordinator(ledger.connect(id("alice")));

        let outcome = coordinator.send(&id("bob"), "again", true).await.unwrap();

        assert_eq!(outcome, SendOutcome::Delivered);
        assert_eq!(ledger.calls().fetch_conversation, 0);
    }

    #[tokio::test]
    async fn transport_failure_propagates_and_clears_flag() {
        let ledger = MemoryLedger::new();
        ledger.set_available(false);
        let coordinator = coordinator(ledger.connect(id("alice")));

        let err = coordinator.send(&id("bob"), "hi", false).await.unwrap_err();

        assert!(matches!(err, ClientError::Unavailable(_)));
        assert!(!coordinator.is_sending());
        assert_eq!(ledger.calls().fetch_conversation, 0);
    }
}
