use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parley_types::{ConversationHandle, Identity, Message};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::log::LocalLog;
use crate::resolver::{ConversationResolver, Discovered};
use crate::send::{MessageContent, SendCoordinator, SendOutcome};
use crate::sync::MessageSynchronizer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    /// No conversation with the recipient is known yet.
    Unresolved,
    /// A handle is bound but nothing is polling it.
    Resolved,
    /// Bound and polled on the configured interval.
    Syncing,
}

/// What presentation code renders from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSnapshot {
    pub state: ConversationState,
    pub handle: Option<ConversationHandle>,
    pub messages: Vec<Message>,
    pub is_loading_initial: bool,
}

impl ChatSnapshot {
    fn loading() -> Self {
        Self {
            state: ConversationState::Unresolved,
            handle: None,
            messages: Vec::new(),
            is_loading_initial: true,
        }
    }
}

enum Command {
    Resolve(oneshot::Sender<Option<ConversationHandle>>),
    Adopt(Discovered),
    StartSync(ConversationHandle),
    StopSync,
    SyncNow,
}

/// One open conversation with one recipient.
///
/// A background driver task owns the local log and cursor; every poll,
/// discovery pass and seeding step runs on that task, one at a time. Cloning
/// the session shares the same driver. Closing it (or dropping the last
/// clone) cancels the driver, and whatever ledger call it was waiting on is
/// abandoned without touching the log.
pub struct ChatSession<B> {
    inner: Arc<SessionInner<B>>,
}

impl<B> Clone for ChatSession<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

struct SessionInner<B> {
    id: Uuid,
    recipient: Identity,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<ChatSnapshot>,
    coordinator: SendCoordinator<B>,
    send_guard: AtomicBool,
    cancel: CancellationToken,
}

impl<B> Drop for SessionInner<B> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<B> ChatSession<B> {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn recipient(&self) -> &Identity {
        &self.inner.recipient
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Stop the driver. Idempotent.
    pub fn close(&self) {
        if !self.inner.cancel.is_cancelled() {
            debug!(session = %self.inner.id, recipient = %self.inner.recipient, "closing chat session");
            self.inner.cancel.cancel();
        }
    }
}

impl<B: Backend> ChatSession<B> {
    /// Open a session and start discovery in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(backend: Arc<B>, recipient: Identity, config: Arc<ClientConfig>) -> Self {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(ChatSnapshot::loading());

        let resolver = ConversationResolver::new(backend.clone(), config.clone());
        let coordinator =
            SendCoordinator::new(backend.clone(), resolver.clone()).with_cancel(cancel.clone());

        let driver = Driver {
            recipient: recipient.clone(),
            config,
            resolver,
            synchronizer: MessageSynchronizer::new(backend),
            log: LocalLog::new(),
            handle: None,
            loading: true,
            poll: None,
            rediscover: None,
            snapshot: snapshot_tx,
            cancel: cancel.clone(),
        };

        let span = info_span!("chat_session", session = %id, %recipient);
        tokio::spawn(driver.run(commands_rx).instrument(span));

        Self {
            inner: Arc::new(SessionInner {
                id,
                recipient,
                commands: commands_tx,
                snapshot: snapshot_rx,
                coordinator,
                send_guard: AtomicBool::new(false),
                cancel,
            }),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ChatSnapshot> {
        self.inner.snapshot.clone()
    }

    /// Sends not yet finished, as a watchable counter. Non-zero exactly while
    /// `send` would reject another message with `SendInProgress`.
    pub fn subscribe_sending(&self) -> watch::Receiver<usize> {
        self.inner.coordinator.subscribe()
    }

    pub fn snapshot(&self) -> ChatSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.snapshot.borrow().messages.clone()
    }

    pub fn state(&self) -> ConversationState {
        self.inner.snapshot.borrow().state
    }

    pub fn handle(&self) -> Option<ConversationHandle> {
        self.inner.snapshot.borrow().handle
    }

    pub fn is_loading_initial(&self) -> bool {
        self.inner.snapshot.borrow().is_loading_initial
    }

    pub fn is_sending(&self) -> bool {
        self.inner.coordinator.is_sending()
    }

    /// Run a discovery pass unless a handle is already bound.
    pub async fn resolve(&self) -> Result<Option<ConversationHandle>> {
        let (tx, rx) = oneshot::channel();
        self.command(Command::Resolve(tx))?;
        rx.await.map_err(|_| ClientError::SessionClosed)
    }

    /// Poll `handle` on the configured interval, starting now. Binding a
    /// different handle than the current one discards the local log.
    pub fn start_sync(&self, handle: ConversationHandle) -> Result<()> {
        self.command(Command::StartSync(handle))
    }

    pub fn stop_sync(&self) -> Result<()> {
        self.command(Command::StopSync)
    }

    /// Ask for a poll outside the regular schedule. Ignored unless the
    /// session is syncing.
    pub fn sync_now(&self) -> Result<()> {
        self.command(Command::SyncNow)
    }

    /// Send a message to this session's recipient.
    ///
    /// Blank content is a no-op. A second send while one is outstanding is
    /// rejected with `SendInProgress`. Transport failures are returned so the
    /// caller can offer a retry with the same text. Closing the session while
    /// the send is reconciling ends it with `SendOutcome::Unresolved`.
    pub async fn send(&self, content: &str) -> Result<SendOutcome> {
        if self.is_closed() {
            return Err(ClientError::SessionClosed);
        }
        if MessageContent::parse(content).is_err() {
            return Ok(SendOutcome::Blank);
        }
        if self.inner.send_guard.swap(true, Ordering::AcqRel) {
            return Err(ClientError::SendInProgress);
        }
        let _guard = ResetOnDrop(&self.inner.send_guard);

        let resolved = self.handle().is_some();
        let outcome = self
            .inner
            .coordinator
            .send(&self.inner.recipient, content, resolved)
            .await?;

        // A closed session simply drops these.
        match &outcome {
            SendOutcome::Delivered => {
                let _ = self.command(Command::SyncNow);
            }
            SendOutcome::Resolved(found) => {
                let _ = self.command(Command::Adopt(found.clone()));
            }
            SendOutcome::Blank | SendOutcome::Unresolved => {}
        }

        Ok(outcome)
    }

    fn command(&self, command: Command) -> Result<()> {
        if self.is_closed() {
            return Err(ClientError::SessionClosed);
        }
        self.inner
            .commands
            .send(command)
            .map_err(|_| ClientError::SessionClosed)
    }
}

struct ResetOnDrop<'a>(&'a AtomicBool);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns all mutable conversation state of one session.
struct Driver<B> {
    recipient: Identity,
    config: Arc<ClientConfig>,
    resolver: ConversationResolver<B>,
    synchronizer: MessageSynchronizer<B>,
    log: LocalLog,
    handle: Option<ConversationHandle>,
    loading: bool,
    poll: Option<Interval>,
    rediscover: Option<Interval>,
    snapshot: watch::Sender<ChatSnapshot>,
    cancel: CancellationToken,
}

impl<B: Backend> Driver<B> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        // Mount: find out whether the conversation already exists.
        let Some(found) = self.guarded(self.resolver.discover(&self.recipient)).await else {
            return;
        };
        self.loading = false;
        match found {
            Some(found) => self.adopt(found),
            None => {
                self.arm_rediscovery();
                self.publish();
            }
        }

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = tick(&mut self.poll) => self.poll_once().await,
                _ = tick(&mut self.rediscover) => self.rediscover_once().await,
            }
        }

        debug!("chat session driver stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Resolve(reply) => {
                if self.handle.is_none() {
                    self.rediscover_once().await;
                }
                let _ = reply.send(self.handle);
            }
            Command::Adopt(found) => self.adopt(found),
            Command::StartSync(handle) => {
                if self.handle != Some(handle) {
                    if let Some(previous) = self.handle {
                        info!(%previous, %handle, "conversation handle changed, resetting log");
                    }
                    self.log.clear();
                    self.handle = Some(handle);
                    self.rediscover = None;
                }
                self.start_polling();
            }
            Command::StopSync => {
                self.poll = None;
                self.publish();
            }
            Command::SyncNow if self.poll.is_some() => self.poll_once().await,
            Command::SyncNow => debug!("sync stopped, ignoring poll request"),
        }
    }

    /// Bind a discovered conversation: seed the log from its snapshot and
    /// start polling.
    fn adopt(&mut self, found: Discovered) {
        match self.handle {
            None => {
                info!(handle = %found.handle, seeded = found.view.messages.len(), "conversation resolved");
                self.handle = Some(found.handle);
                self.log.seed(found.view.messages);
                self.rediscover = None;
                self.start_polling();
            }
            Some(current) if current == found.handle => {
                if self.log.merge(found.view.messages) > 0 {
                    self.publish();
                }
            }
            Some(current) => {
                warn!(%current, found = %found.handle, "ignoring second conversation for recipient");
            }
        }
    }

    /// Arm the interval and request the immediate first poll.
    fn start_polling(&mut self) {
        if self.poll.is_none() {
            self.poll = Some(interval_from_now(self.config.poll_interval));
        }
        self.publish();
        // The interval's first tick is a full period away; queue one now.
        if let Some(poll) = self.poll.as_mut() {
            poll.reset_immediately();
        }
    }

    fn arm_rediscovery(&mut self) {
        if let Some(period) = self.config.rediscover_interval {
            self.rediscover = Some(interval_from_now(period));
        }
    }

    async fn poll_once(&mut self) {
        let Some(handle) = self.handle else {
            return;
        };

        let cursor = self.log.cursor();
        let Some(result) = self.guarded(self.synchronizer.sync(handle, cursor)).await else {
            return;
        };

        match result {
            Ok(batch) => {
                let appended = self.log.merge(batch);
                if appended > 0 {
                    debug!(%handle, appended, cursor = ?self.log.cursor(), "new messages");
                    self.publish();
                }
            }
            Err(e) => warn!(%handle, error = %e, "poll failed, retrying next tick"),
        }
    }

    async fn rediscover_once(&mut self) {
        let Some(found) = self.guarded(self.resolver.discover(&self.recipient)).await else {
            return;
        };
        if let Some(found) = found {
            self.adopt(found);
        }
    }

    /// Await `fut` unless the session is torn down first.
    async fn guarded<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            out = fut => Some(out),
        }
    }

    fn publish(&self) {
        let state = match (self.handle, self.poll.is_some()) {
            (None, _) => ConversationState::Unresolved,
            (Some(_), false) => ConversationState::Resolved,
            (Some(_), true) => ConversationState::Syncing,
        };

        self.snapshot.send_replace(ChatSnapshot {
            state,
            handle: self.handle,
            messages: self.log.entries().to_vec(),
            is_loading_initial: self.loading,
        });
    }
}

fn interval_from_now(period: std::time::Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    // A slow poll pushes the schedule back instead of bunching ticks.
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
