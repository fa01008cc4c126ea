//! Generation session controller.
//!
//! Drives one generation from submission to a terminal state and reconciles
//! the partial text the backend reports into exactly one platform message:
//! the first usable candidate is sent, later candidates are edited in, and
//! the session converges once two consecutive candidates are identical.
//! Output that stops partway into the sentinel is held back for a tick.
//!
//! ```text
//! Submitted ──submit──▶ Polling ──same text twice──▶ Converged
//!     │                    │
//!     └──────error─────────┴──error / deadline──────▶ Failed
//! ```

use chrono::Utc;
use koboldcord_core::backend::{BackendMode, GenerationBackend, GenerationRequest, GenerationStatus};
use koboldcord_core::channel::{Channel, ChannelId, MessageHandle};
use koboldcord_core::error::GenerationError;
use koboldcord_core::event::{DomainEvent, EventBus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::context::StopSet;
use crate::postprocess::{PostProcessor, Reply};

/// Set to request that a running session stop at its next suspension point.
pub type CancellationFlag = Arc<AtomicBool>;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_POLL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Submitted,
    Polling,
    Converged,
    Failed,
}

/// What the controller should do after one observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickAction {
    /// Backend has nothing yet
    Wait,
    /// Candidate was empty; convergence state untouched
    Ignore,
    /// Post the first visible reply
    Send(String),
    /// Revise the visible reply in place
    Edit(String),
    /// Output stopped changing
    Converge,
    /// The model declined to reply
    Suppress,
}

/// Reconciliation state of one generation.
#[derive(Debug, Clone)]
pub struct GenerationSession {
    state: SessionState,
    previous: Option<String>,
    message: Option<MessageHandle>,
    held: Option<String>,
    ticks: u32,
}

impl GenerationSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Submitted,
            previous: None,
            message: None,
            held: None,
            ticks: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn message(&self) -> Option<&MessageHandle> {
        self.message.as_ref()
    }

    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }

    /// The backend reported no text.
    pub fn observe_pending(&mut self) -> TickAction {
        self.ticks += 1;
        self.state = SessionState::Polling;
        TickAction::Wait
    }

    /// Fold one post-processed candidate into the session.
    ///
    /// Until a message has been recorded with [`record_sent`](Self::record_sent)
    /// every text candidate asks for a send, so a failed send is retried with
    /// the next candidate.
    pub fn observe(&mut self, reply: Reply) -> TickAction {
        self.ticks += 1;
        self.state = SessionState::Polling;
        match reply {
            Reply::Empty => TickAction::Ignore,
            Reply::Suppressed => {
                self.state = SessionState::Converged;
                TickAction::Suppress
            }
            Reply::Text(text) => {
                if self.message.is_none() {
                    self.previous = Some(text.clone());
                    TickAction::Send(text)
                } else if self.previous.as_deref() == Some(text.as_str()) {
                    self.state = SessionState::Converged;
                    TickAction::Converge
                } else {
                    self.previous = Some(text.clone());
                    TickAction::Edit(text)
                }
            }
        }
    }

    /// Decide whether to hold back raw output that may be the start of the
    /// sentinel.
    ///
    /// New raw text is held for one tick. The same raw text seen again means
    /// generation stopped there, so it is released.
    pub fn hold(&mut self, raw: &str) -> bool {
        if self.held.as_deref() == Some(raw) {
            return false;
        }
        self.held = Some(raw.to_string());
        true
    }

    pub fn record_sent(&mut self, handle: MessageHandle) {
        self.message = Some(handle);
    }

    fn fail(&mut self) {
        self.state = SessionState::Failed;
    }

    fn converged(&mut self) -> SessionOutcome {
        self.state = SessionState::Converged;
        SessionOutcome::Converged {
            message: self.message.clone(),
            text: self.previous.clone().unwrap_or_default(),
            ticks: self.ticks,
        }
    }
}

impl Default for GenerationSession {
    fn default() -> Self {
        Self::new()
    }
}

/// How a session ended.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    Converged {
        message: Option<MessageHandle>,
        text: String,
        ticks: u32,
    },
    Suppressed,
    Empty,
    Failed(GenerationError),
    Cancelled,
}

impl SessionOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            SessionOutcome::Converged { .. } => "converged",
            SessionOutcome::Suppressed => "suppressed",
            SessionOutcome::Empty => "empty",
            SessionOutcome::Failed(_) => "failed",
            SessionOutcome::Cancelled => "cancelled",
        }
    }
}

/// Runs generation sessions against one backend.
pub struct SessionController {
    backend: Arc<dyn GenerationBackend>,
    mode: BackendMode,
    poll_interval: Duration,
    max_poll: Duration,
    events: Option<Arc<EventBus>>,
}

impl SessionController {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self {
            backend,
            mode: BackendMode::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll: DEFAULT_MAX_POLL,
            events: None,
        }
    }

    pub fn with_mode(mut self, mode: BackendMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Overall bound on one session (polling in async mode, the blocking
    /// call in sync mode).
    pub fn with_max_poll(mut self, max_poll: Duration) -> Self {
        self.max_poll = max_poll;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn mode(&self) -> BackendMode {
        self.mode
    }

    /// Run one session to a terminal state.
    pub async fn run(
        &self,
        channel: &dyn Channel,
        channel_id: &ChannelId,
        request: &GenerationRequest,
        post: &PostProcessor,
        stops: &StopSet,
        cancel: &CancellationFlag,
    ) -> SessionOutcome {
        let started = Instant::now();
        let mut session = GenerationSession::new();

        let outcome = if is_cancelled(cancel) {
            SessionOutcome::Cancelled
        } else {
            self.typing(channel, channel_id).await;
            match self.mode {
                BackendMode::Sync => {
                    self.run_sync(channel, channel_id, request, post, stops, &mut session)
                        .await
                }
                BackendMode::Async => {
                    self.run_async(channel, channel_id, request, post, stops, cancel, &mut session)
                        .await
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            SessionOutcome::Failed(e) => error!(
                channel = %channel_id,
                ticks = session.ticks(),
                error = %e,
                "Generation session failed"
            ),
            other => info!(
                channel = %channel_id,
                outcome = other.label(),
                ticks = session.ticks(),
                duration_ms,
                "Generation session finished"
            ),
        }
        self.publish(DomainEvent::SessionFinished {
            channel: channel_id.to_string(),
            outcome: outcome.label().to_string(),
            ticks: session.ticks(),
            duration_ms,
            timestamp: Utc::now(),
        });
        outcome
    }

    async fn run_sync(
        &self,
        channel: &dyn Channel,
        channel_id: &ChannelId,
        request: &GenerationRequest,
        post: &PostProcessor,
        stops: &StopSet,
        session: &mut GenerationSession,
    ) -> SessionOutcome {
        let raw = match tokio::time::timeout(self.max_poll, self.backend.generate(request)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                session.fail();
                return SessionOutcome::Failed(e);
            }
            Err(_) => {
                session.fail();
                return SessionOutcome::Failed(GenerationError::Timeout {
                    after_secs: self.max_poll.as_secs(),
                });
            }
        };

        match session.observe(post.process(&raw, stops)) {
            TickAction::Send(text) => {
                if let Some(handle) = self.send(channel, channel_id, &text).await {
                    session.record_sent(handle);
                }
                session.converged()
            }
            TickAction::Suppress => SessionOutcome::Suppressed,
            _ => SessionOutcome::Empty,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_async(
        &self,
        channel: &dyn Channel,
        channel_id: &ChannelId,
        request: &GenerationRequest,
        post: &PostProcessor,
        stops: &StopSet,
        cancel: &CancellationFlag,
        session: &mut GenerationSession,
    ) -> SessionOutcome {
        if let Err(e) = self.backend.submit(request).await {
            session.fail();
            return SessionOutcome::Failed(e);
        }
        debug!(channel = %channel_id, backend = self.backend.name(), "Generation submitted");

        let deadline = Instant::now() + self.max_poll;
        loop {
            tokio::time::sleep(self.poll_interval).await;

            if is_cancelled(cancel) {
                info!(channel = %channel_id, ticks = session.ticks(), "Generation cancelled");
                self.abort().await;
                return SessionOutcome::Cancelled;
            }
            if Instant::now() >= deadline {
                warn!(
                    channel = %channel_id,
                    after_secs = self.max_poll.as_secs(),
                    "Generation did not converge before the deadline"
                );
                self.abort().await;
                session.fail();
                return SessionOutcome::Failed(GenerationError::Timeout {
                    after_secs: self.max_poll.as_secs(),
                });
            }

            self.typing(channel, channel_id).await;

            let action = match self.backend.check().await {
                Ok(GenerationStatus::Pending) => session.observe_pending(),
                Ok(GenerationStatus::Ready(raw)) => {
                    let reply = post.process(&raw, stops);
                    if matches!(reply, Reply::Text(_))
                        && post.ends_with_partial_sentinel(&raw)
                        && session.hold(&raw)
                    {
                        session.observe(Reply::Empty)
                    } else {
                        session.observe(reply)
                    }
                }
                Err(e) => {
                    session.fail();
                    return SessionOutcome::Failed(e);
                }
            };

            debug!(channel = %channel_id, tick = session.ticks(), action = ?action, "Poll tick");

            match action {
                TickAction::Wait | TickAction::Ignore => {}
                TickAction::Send(text) => {
                    if let Some(handle) = self.send(channel, channel_id, &text).await {
                        session.record_sent(handle);
                    }
                }
                TickAction::Edit(text) => {
                    if let Some(handle) = session.message() {
                        self.edit(channel, handle, &text).await;
                    }
                }
                TickAction::Converge => return session.converged(),
                TickAction::Suppress => return SessionOutcome::Suppressed,
            }
        }
    }

    async fn send(&self, channel: &dyn Channel, channel_id: &ChannelId, text: &str) -> Option<MessageHandle> {
        match channel.send(channel_id, text).await {
            Ok(handle) => {
                debug!(channel = %channel_id, chars = text.len(), "Reply sent");
                self.publish(DomainEvent::ResponseSent {
                    channel: channel_id.to_string(),
                    message_id: handle.message_id.to_string(),
                    timestamp: Utc::now(),
                });
                Some(handle)
            }
            Err(e) => {
                warn!(channel = %channel_id, error = %e, "Failed to send reply, retrying next tick");
                None
            }
        }
    }

    async fn edit(&self, channel: &dyn Channel, handle: &MessageHandle, text: &str) {
        match channel.edit(handle, text).await {
            Ok(()) => {
                debug!(channel = %handle.channel_id, chars = text.len(), "Reply edited");
                self.publish(DomainEvent::ResponseEdited {
                    channel: handle.channel_id.to_string(),
                    message_id: handle.message_id.to_string(),
                    timestamp: Utc::now(),
                });
            }
            Err(e) => warn!(channel = %handle.channel_id, error = %e, "Failed to edit reply"),
        }
    }

    async fn typing(&self, channel: &dyn Channel, channel_id: &ChannelId) {
        if let Err(e) = channel.send_typing(channel_id).await {
            debug!(channel = %channel_id, error = %e, "Typing indicator failed");
        }
    }

    async fn abort(&self) {
        if let Err(e) = self.backend.abort().await {
            warn!(backend = self.backend.name(), error = %e, "Backend abort failed");
        }
    }

    fn publish(&self, event: DomainEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

fn is_cancelled(flag: &CancellationFlag) -> bool {
    flag.load(Ordering::Relaxed)
}
