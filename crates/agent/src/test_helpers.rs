//! Shared test doubles for the agent crate.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use koboldcord_core::backend::{GenerationBackend, GenerationRequest, GenerationStatus};
use koboldcord_core::channel::{Channel, ChannelId, InboundMessage, MessageHandle};
use koboldcord_core::error::{ChannelError, GenerationError};
use koboldcord_core::message::{ConversationMessage, MessageId};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

/// `2024-05-01 12:<minute>:00 UTC`
pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
}

pub fn msg(id: &str, author: &str, minute: u32, content: &str) -> ConversationMessage {
    ConversationMessage::new(id, author, at(minute), content)
}

/// A backend that replays a scripted sequence of `check` results.
///
/// Once the script is exhausted every further `check` reports `Pending`.
pub struct ScriptedBackend {
    script: Mutex<VecDeque<Result<GenerationStatus, GenerationError>>>,
    generate_result: Mutex<Option<Result<String, GenerationError>>>,
    submit_error: Option<GenerationError>,
    checks: Mutex<usize>,
    submits: Mutex<usize>,
    generates: Mutex<usize>,
    aborts: Mutex<usize>,
    last_request: Mutex<Option<GenerationRequest>>,
}

impl ScriptedBackend {
    pub fn with_statuses(script: Vec<Result<GenerationStatus, GenerationError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            generate_result: Mutex::new(None),
            submit_error: None,
            checks: Mutex::new(0),
            submits: Mutex::new(0),
            generates: Mutex::new(0),
            aborts: Mutex::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Every check returns the next text as `Ready`.
    pub fn polling(texts: &[&str]) -> Self {
        Self::with_statuses(
            texts
                .iter()
                .map(|t| Ok(GenerationStatus::Ready(t.to_string())))
                .collect(),
        )
    }

    /// A backend for synchronous mode.
    pub fn sync(result: Result<String, GenerationError>) -> Self {
        let backend = Self::with_statuses(vec![]);
        *backend.generate_result.lock().unwrap() = Some(result);
        backend
    }

    pub fn failing_submit(mut self, error: GenerationError) -> Self {
        self.submit_error = Some(error);
        self
    }

    pub fn checks(&self) -> usize {
        *self.checks.lock().unwrap()
    }

    pub fn submits(&self) -> usize {
        *self.submits.lock().unwrap()
    }

    pub fn generates(&self) -> usize {
        *self.generates.lock().unwrap()
    }

    pub fn aborts(&self) -> usize {
        *self.aborts.lock().unwrap()
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        *self.generates.lock().unwrap() += 1;
        *self.last_request.lock().unwrap() = Some(request.clone());
        self.generate_result
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Err(GenerationError::NotConfigured("no sync result".into())))
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<(), GenerationError> {
        *self.submits.lock().unwrap() += 1;
        *self.last_request.lock().unwrap() = Some(request.clone());
        match &self.submit_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn check(&self) -> Result<GenerationStatus, GenerationError> {
        *self.checks.lock().unwrap() += 1;
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(GenerationStatus::Pending))
    }

    async fn abort(&self) -> Result<(), GenerationError> {
        *self.aborts.lock().unwrap() += 1;
        Ok(())
    }
}

/// A channel that serves canned history and records every outbound call.
pub struct RecordingChannel {
    history: Vec<ConversationMessage>,
    fail_history: bool,
    failing_sends: Mutex<usize>,
    fetches: Mutex<Vec<(ChannelId, MessageId, usize)>>,
    sends: Mutex<Vec<(ChannelId, String)>>,
    edits: Mutex<Vec<(MessageHandle, String)>>,
    typing: Mutex<usize>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self {
            history: vec![],
            fail_history: false,
            failing_sends: Mutex::new(0),
            fetches: Mutex::new(vec![]),
            sends: Mutex::new(vec![]),
            edits: Mutex::new(vec![]),
            typing: Mutex::new(0),
        }
    }

    /// History returned by `fetch_recent`, newest first.
    pub fn with_history(mut self, history: Vec<ConversationMessage>) -> Self {
        self.history = history;
        self
    }

    pub fn failing_history(mut self) -> Self {
        self.fail_history = true;
        self
    }

    /// Fail the next `count` sends.
    pub fn failing_sends(self, count: usize) -> Self {
        *self.failing_sends.lock().unwrap() = count;
        self
    }

    pub fn fetches(&self) -> Vec<(ChannelId, MessageId, usize)> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn sends(&self) -> Vec<(ChannelId, String)> {
        self.sends.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<(MessageHandle, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn typing_count(&self) -> usize {
        *self.typing.lock().unwrap()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<InboundMessage, ChannelError>>, ChannelError> {
        let (_tx, rx) = mpsc::channel(1);
        Ok(rx)
    }

    async fn fetch_recent(
        &self,
        channel_id: &ChannelId,
        before: &MessageId,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, ChannelError> {
        self.fetches
            .lock()
            .unwrap()
            .push((channel_id.clone(), before.clone(), limit));
        if self.fail_history {
            return Err(ChannelError::HistoryFetch {
                channel: channel_id.to_string(),
                reason: "missing access".into(),
            });
        }
        Ok(self.history.iter().take(limit).cloned().collect())
    }

    async fn send(&self, channel_id: &ChannelId, content: &str) -> Result<MessageHandle, ChannelError> {
        {
            let mut failing = self.failing_sends.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(ChannelError::DeliveryFailed {
                    channel: channel_id.to_string(),
                    reason: "rate limited".into(),
                });
            }
        }
        let mut sends = self.sends.lock().unwrap();
        sends.push((channel_id.clone(), content.to_string()));
        Ok(MessageHandle {
            channel_id: channel_id.clone(),
            message_id: MessageId(format!("sent-{}", sends.len())),
        })
    }

    async fn edit(&self, handle: &MessageHandle, content: &str) -> Result<(), ChannelError> {
        self.edits
            .lock()
            .unwrap()
            .push((handle.clone(), content.to_string()));
        Ok(())
    }

    async fn send_typing(&self, _channel_id: &ChannelId) -> Result<(), ChannelError> {
        *self.typing.lock().unwrap() += 1;
        Ok(())
    }
}
