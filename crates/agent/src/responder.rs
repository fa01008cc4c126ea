//! Trigger orchestration.
//!
//! One [`Responder`] owns the whole pipeline for a channel: it filters
//! inbound messages, holds the single-flight gate, builds the prompt and
//! hands it to the session controller.

use chrono::Utc;
use koboldcord_config::AppConfig;
use koboldcord_core::backend::{GenerationBackend, GenerationRequest, SamplerSettings};
use koboldcord_core::channel::{Channel, ChannelId, InboundMessage};
use koboldcord_core::error::{ChannelError, ConfigError};
use koboldcord_core::event::{DomainEvent, EventBus};
use koboldcord_core::message::MessageId;
use koboldcord_core::persona::Persona;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::context::{HistoryCollector, PromptRenderer, StopSet};
use crate::flight::FlightGate;
use crate::postprocess::PostProcessor;
use crate::session::{CancellationFlag, SessionController, SessionOutcome};

const PREVIEW_CHARS: usize = 80;

/// Why an inbound message did not trigger a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OwnMessage,
    BroadcastMention,
    NotMentioned,
}

/// Result of handling one inbound message.
#[derive(Debug)]
pub enum TriggerOutcome {
    Ignored(IgnoreReason),
    /// A generation was already in flight for this scope
    Dropped,
    Finished(SessionOutcome),
}

pub struct Responder {
    persona: Arc<Persona>,
    channel: Arc<dyn Channel>,
    collector: HistoryCollector,
    renderer: PromptRenderer,
    post: PostProcessor,
    controller: SessionController,
    sampler: SamplerSettings,
    gate: FlightGate,
    mention_gated: bool,
    events: Arc<EventBus>,
    active: Mutex<HashMap<MessageId, CancellationFlag>>,
}

impl Responder {
    pub fn new(
        config: &AppConfig,
        persona: Arc<Persona>,
        channel: Arc<dyn Channel>,
        backend: Arc<dyn GenerationBackend>,
        events: Arc<EventBus>,
    ) -> Result<Self, ConfigError> {
        let template = config.chat_template()?;
        if persona.system_prompt.family() != template.family {
            return Err(ConfigError::SlotMismatch {
                family: template.family.to_string(),
                reason: format!(
                    "persona '{}' was validated for the {} family",
                    persona.name,
                    persona.system_prompt.family()
                ),
            });
        }

        let renderer = PromptRenderer::new(template, persona.clone())
            .with_entry_style(config.response.entry_style);
        let post = PostProcessor::new(persona.name.clone())
            .with_sentinel(config.sentinel().map(str::to_string))
            .with_output_tags(config.response.output_tags.clone());
        let controller = SessionController::new(backend)
            .with_mode(config.backend.mode)
            .with_poll_interval(config.poll_interval())
            .with_max_poll(config.max_poll())
            .with_events(events.clone());

        Ok(Self {
            persona,
            channel,
            collector: HistoryCollector::new(config.history.limit),
            renderer,
            post,
            controller,
            sampler: config.sampler.clone(),
            gate: FlightGate::new(config.concurrency.scope),
            mention_gated: config.response.mention_gated,
            events,
            active: Mutex::new(HashMap::new()),
        })
    }

    pub fn gate(&self) -> &FlightGate {
        &self.gate
    }

    /// Why `inbound` should not trigger a reply, if it should not.
    pub fn ignore_reason(&self, inbound: &InboundMessage) -> Option<IgnoreReason> {
        if inbound.from_self {
            return Some(IgnoreReason::OwnMessage);
        }
        if inbound.mentions_everyone {
            return Some(IgnoreReason::BroadcastMention);
        }
        if self.mention_gated && !inbound.mentions_self && !self.names_persona(&inbound.message.content) {
            return Some(IgnoreReason::NotMentioned);
        }
        None
    }

    fn names_persona(&self, content: &str) -> bool {
        content
            .to_lowercase()
            .contains(&self.persona.name.to_lowercase())
    }

    /// Handle one inbound message end to end.
    pub async fn handle(&self, inbound: InboundMessage) -> TriggerOutcome {
        let channel_id = &inbound.channel_id;
        let trigger = &inbound.message;

        if let Some(reason) = self.ignore_reason(&inbound) {
            debug!(channel = %channel_id, author = %trigger.author, reason = ?reason, "Ignoring message");
            return TriggerOutcome::Ignored(reason);
        }

        let Some(_permit) = self.gate.try_acquire(channel_id) else {
            warn!(
                channel = %channel_id,
                author = %trigger.author,
                scope = ?self.gate.scope(),
                "Generation already in flight, dropping trigger"
            );
            self.events.publish(DomainEvent::TriggerDropped {
                channel: channel_id.to_string(),
                author: trigger.author.clone(),
                timestamp: Utc::now(),
            });
            return TriggerOutcome::Dropped;
        };

        info!(channel = %channel_id, author = %trigger.author, "Responding to trigger");
        self.events.publish(DomainEvent::TriggerReceived {
            channel: channel_id.to_string(),
            author: trigger.author.clone(),
            content_preview: trigger.content.chars().take(PREVIEW_CHARS).collect(),
            timestamp: Utc::now(),
        });

        let active = self.register(&trigger.id);
        let outcome = self.generate(channel_id, &inbound, &active.flag).await;
        drop(active);

        TriggerOutcome::Finished(outcome)
    }

    async fn generate(
        &self,
        channel_id: &ChannelId,
        inbound: &InboundMessage,
        cancel: &CancellationFlag,
    ) -> SessionOutcome {
        let window = self
            .collector
            .collect(self.channel.as_ref(), channel_id, &inbound.message)
            .await;
        let stops = StopSet::build(self.renderer.template(), &window);
        let request = GenerationRequest {
            sampler: self.sampler.clone(),
            stop_sequence: stops.to_vec(),
            prompt: self.renderer.render(&window, &stops),
        };
        debug!(
            channel = %channel_id,
            template = self.renderer.template().name,
            stops = stops.len(),
            chars = request.prompt.len(),
            "Prompt rendered"
        );

        self.controller
            .run(self.channel.as_ref(), channel_id, &request, &self.post, &stops, cancel)
            .await
    }

    fn register(&self, id: &MessageId) -> ActiveSession<'_> {
        let flag: CancellationFlag = Arc::new(AtomicBool::new(false));
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id.clone(), flag.clone());
        ActiveSession {
            registry: &self.active,
            id: id.clone(),
            flag,
        }
    }

    /// Number of sessions currently registered for cancellation.
    pub fn active_sessions(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Ask every running session to stop. Returns how many were signalled.
    pub fn cancel_active(&self) -> usize {
        let active = self
            .active
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for flag in active.values() {
            flag.store(true, Ordering::Relaxed);
        }
        active.len()
    }

    /// Consume the channel's inbound stream, one task per message.
    ///
    /// Returns once the stream closes and every spawned session finished.
    pub async fn run(self: Arc<Self>) -> Result<(), ChannelError> {
        let mut inbound = self.channel.start().await?;
        info!(channel = self.channel.name(), persona = %self.persona.name, "Responder started");

        let mut tasks = JoinSet::new();
        while let Some(item) = inbound.recv().await {
            while tasks.try_join_next().is_some() {}
            match item {
                Ok(message) => {
                    let this = self.clone();
                    tasks.spawn(async move { this.handle(message).await });
                }
                Err(e) => {
                    warn!(channel = self.channel.name(), error = %e, "Inbound event error");
                    self.events.publish(DomainEvent::ErrorOccurred {
                        context: format!("{} inbound", self.channel.name()),
                        error_message: e.to_string(),
                        timestamp: Utc::now(),
                    });
                }
            }
        }

        while tasks.join_next().await.is_some() {}
        info!(channel = self.channel.name(), "Responder stopped");
        Ok(())
    }
}

/// Registration of one running session's cancellation flag, removed on drop.
struct ActiveSession<'a> {
    registry: &'a Mutex<HashMap<MessageId, CancellationFlag>>,
    id: MessageId,
    flag: CancellationFlag,
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{RecordingChannel, ScriptedBackend, msg};
    use koboldcord_core::error::GenerationError;
    use koboldcord_core::template::TemplateFamily;

    const PROMPT: &str = "You are {persona}. {personaDescription}\n{conversationBody}";

    fn persona() -> Arc<Persona> {
        Arc::new(Persona::from_parts("Hobbes", "A tiger.", PROMPT, TemplateFamily::TurnTag).unwrap())
    }

    fn responder(channel: Arc<RecordingChannel>, backend: Arc<ScriptedBackend>) -> Arc<Responder> {
        Arc::new(
            Responder::new(
                &AppConfig::default(),
                persona(),
                channel,
                backend,
                Arc::new(EventBus::default()),
            )
            .unwrap(),
        )
    }

    fn inbound(id: &str, content: &str) -> InboundMessage {
        InboundMessage {
            channel_id: ChannelId::from("general"),
            message: msg(id, "alice", 10, content),
            from_self: false,
            mentions_self: false,
            mentions_everyone: false,
        }
    }

    fn mention(id: &str) -> InboundMessage {
        InboundMessage {
            mentions_self: true,
            ..inbound(id, "hey there")
        }
    }

    #[test]
    fn filters_own_broadcast_and_unmentioned_messages() {
        let r = responder(
            Arc::new(RecordingChannel::new()),
            Arc::new(ScriptedBackend::polling(&[])),
        );
        let own = InboundMessage { from_self: true, ..mention("1") };
        let everyone = InboundMessage { mentions_everyone: true, ..mention("2") };

        assert_eq!(r.ignore_reason(&own), Some(IgnoreReason::OwnMessage));
        assert_eq!(r.ignore_reason(&everyone), Some(IgnoreReason::BroadcastMention));
        assert_eq!(r.ignore_reason(&inbound("3", "hello all")), Some(IgnoreReason::NotMentioned));
        assert_eq!(r.ignore_reason(&mention("4")), None);
        assert_eq!(r.ignore_reason(&inbound("5", "what do you think, HOBBES?")), None);
    }

    #[test]
    fn mismatched_persona_family_is_rejected() {
        let mut config = AppConfig::default();
        config.template = "mistral".into();
        let result = Responder::new(
            &config,
            persona(),
            Arc::new(RecordingChannel::new()),
            Arc::new(ScriptedBackend::polling(&[])),
            Arc::new(EventBus::default()),
        );
        assert!(matches!(result, Err(ConfigError::SlotMismatch { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn full_pipeline_posts_converged_reply() {
        let channel = Arc::new(
            RecordingChannel::new().with_history(vec![msg("0", "bob", 5, "morning")]),
        );
        let backend = Arc::new(ScriptedBackend::polling(&["Hobbes: Hi", "Hi alice", "Hi alice"]));
        let r = responder(channel.clone(), backend.clone());

        let outcome = r.handle(mention("1")).await;
        assert!(matches!(
            outcome,
            TriggerOutcome::Finished(SessionOutcome::Converged { ref text, .. }) if text == "Hi alice"
        ));

        let request = backend.last_request().unwrap();
        assert!(request.prompt.ends_with("<start_of_turn>model\nHobbes:"));
        assert!(request.prompt.contains("] bob: morning\n"));
        assert!(request.stop_sequence.contains(&"\nalice:".to_string()));
        assert!(request.stop_sequence.contains(&"\nbob:".to_string()));
        assert_eq!(channel.sends()[0].1, "Hi");
        assert_eq!(channel.edits()[0].1, "Hi alice");
        assert!(!r.gate().is_busy(&ChannelId::from("general")));
    }

    #[tokio::test(start_paused = true)]
    async fn second_trigger_is_dropped_while_in_flight() {
        let channel = Arc::new(RecordingChannel::new());
        let backend = Arc::new(ScriptedBackend::with_statuses(vec![]));
        let r = responder(channel.clone(), backend.clone());
        let mut events = r.events.subscribe();

        let first = tokio::spawn({
            let r = r.clone();
            async move { r.handle(mention("1")).await }
        });
        while !r.gate().is_busy(&ChannelId::from("general")) {
            tokio::task::yield_now().await;
        }

        let second = r.handle(mention("2")).await;
        assert!(matches!(second, TriggerOutcome::Dropped));
        // Only the first trigger collected history
        assert_eq!(channel.fetches().len(), 1);

        assert_eq!(r.cancel_active(), 1);
        let first = first.await.unwrap();
        assert!(matches!(first, TriggerOutcome::Finished(SessionOutcome::Cancelled)));
        assert!(!r.gate().is_busy(&ChannelId::from("general")));

        let mut dropped = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event.as_ref(), DomainEvent::TriggerDropped { .. }) {
                dropped += 1;
            }
        }
        assert_eq!(dropped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_trigger_unregisters_its_session() {
        let channel = Arc::new(RecordingChannel::new());
        let backend = Arc::new(ScriptedBackend::with_statuses(vec![]));
        let r = responder(channel, backend);

        let task = tokio::spawn({
            let r = r.clone();
            async move { r.handle(mention("1")).await }
        });
        while !r.gate().is_busy(&ChannelId::from("general")) {
            tokio::task::yield_now().await;
        }
        assert_eq!(r.active_sessions(), 1);

        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
        assert_eq!(r.active_sessions(), 0);
        assert_eq!(r.cancel_active(), 0);
        assert!(!r.gate().is_busy(&ChannelId::from("general")));
    }

    #[tokio::test(start_paused = true)]
    async fn gate_is_released_after_failure() {
        let channel = Arc::new(RecordingChannel::new());
        let backend = Arc::new(ScriptedBackend::with_statuses(vec![Err(
            GenerationError::InvalidResponse("garbage".into()),
        )]));
        let r = responder(channel.clone(), backend.clone());

        let first = r.handle(mention("1")).await;
        assert!(matches!(first, TriggerOutcome::Finished(SessionOutcome::Failed(_))));
        assert!(channel.sends().is_empty());

        // Script exhausted: the next session only sees Pending, so cancel it.
        let second = tokio::spawn({
            let r = r.clone();
            async move { r.handle(mention("2")).await }
        });
        while !r.gate().is_busy(&ChannelId::from("general")) {
            tokio::task::yield_now().await;
        }
        r.cancel_active();
        assert!(matches!(
            second.await.unwrap(),
            TriggerOutcome::Finished(SessionOutcome::Cancelled)
        ));
        assert_eq!(channel.fetches().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ignored_messages_never_touch_the_gate() {
        let channel = Arc::new(RecordingChannel::new());
        let r = responder(channel.clone(), Arc::new(ScriptedBackend::polling(&[])));
        let outcome = r.handle(inbound("1", "unrelated chatter")).await;
        assert!(matches!(outcome, TriggerOutcome::Ignored(IgnoreReason::NotMentioned)));
        assert!(channel.fetches().is_empty());
    }
}
