//! End-to-end tests for the koboldcord reply pipeline.
//!
//! These drive the terminal channel through the full responder: event
//! filtering, history collection, prompt rendering, polling, and the final
//! send/edit reconciliation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use koboldcord_agent::Responder;
use koboldcord_channels::CliChannel;
use koboldcord_config::AppConfig;
use koboldcord_core::backend::{BackendMode, GenerationBackend, GenerationRequest, GenerationStatus};
use koboldcord_core::error::GenerationError;
use koboldcord_core::event::{DomainEvent, EventBus};
use koboldcord_core::persona::Persona;
use koboldcord_core::template::TemplateFamily;

// ── Mock Backend ─────────────────────────────────────────────────────────

/// A backend that replays scripted partial outputs, one per `check`.
struct ScriptedKobold {
    partials: Mutex<VecDeque<String>>,
    final_text: Option<String>,
    requests: Mutex<Vec<GenerationRequest>>,
    checks: Mutex<usize>,
}

impl ScriptedKobold {
    fn polling(partials: &[&str]) -> Self {
        Self {
            partials: Mutex::new(partials.iter().map(|p| p.to_string()).collect()),
            final_text: None,
            requests: Mutex::new(vec![]),
            checks: Mutex::new(0),
        }
    }

    fn sync(text: &str) -> Self {
        Self {
            final_text: Some(text.to_string()),
            ..Self::polling(&[])
        }
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn checks(&self) -> usize {
        *self.checks.lock().unwrap()
    }
}

#[async_trait::async_trait]
impl GenerationBackend for ScriptedKobold {
    fn name(&self) -> &str {
        "e2e_mock"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        self.final_text
            .clone()
            .ok_or_else(|| GenerationError::NotConfigured("no final text".into()))
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<(), GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        Ok(())
    }

    async fn check(&self) -> Result<GenerationStatus, GenerationError> {
        *self.checks.lock().unwrap() += 1;
        Ok(match self.partials.lock().unwrap().pop_front() {
            Some(text) => GenerationStatus::Ready(text),
            None => GenerationStatus::Pending,
        })
    }
}

fn persona() -> Arc<Persona> {
    Arc::new(
        Persona::from_parts(
            "Hobbes",
            "A philosophical tiger.",
            "You are {persona}. {personaDescription}\nConversation:{conversationBody}",
            TemplateFamily::TurnTag,
        )
        .unwrap(),
    )
}

async fn chat(
    config: &AppConfig,
    input: &'static [u8],
    backend: Arc<ScriptedKobold>,
    events: Arc<EventBus>,
) -> Arc<CliChannel> {
    let channel = Arc::new(CliChannel::with_input("alice", "Hobbes", input));
    let responder = Arc::new(
        Responder::new(config, persona(), channel.clone(), backend, events).unwrap(),
    );
    responder.run().await.unwrap();
    channel
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<Arc<DomainEvent>>) -> Vec<&'static str> {
    let mut names = vec![];
    while let Ok(event) = rx.try_recv() {
        names.push(match event.as_ref() {
            DomainEvent::TriggerReceived { .. } => "received",
            DomainEvent::TriggerDropped { .. } => "dropped",
            DomainEvent::ResponseSent { .. } => "sent",
            DomainEvent::ResponseEdited { .. } => "edited",
            DomainEvent::SessionFinished { .. } => "finished",
            DomainEvent::ErrorOccurred { .. } => "error",
        });
    }
    names
}

// ── E2E: Async polling ───────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_partial_output_is_reconciled_into_one_message() {
    let backend = Arc::new(ScriptedKobold::polling(&[
        "",
        "Hobbes: Well,",
        "Well, hello there",
        "Well, hello there\nalice:",
        "never checked",
    ]));
    let events = Arc::new(EventBus::default());
    let mut rx = events.subscribe();

    let channel = chat(&AppConfig::default(), b"hi Hobbes\n", backend.clone(), events).await;

    let transcript = channel.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].author, "alice");
    assert_eq!(transcript[1].author, "Hobbes");
    assert_eq!(transcript[1].content, "Well, hello there");

    // Converged on the stop-trimmed repeat, never reading the last partial
    assert_eq!(backend.checks(), 4);
    assert_eq!(
        drain(&mut rx),
        vec!["received", "sent", "edited", "finished"]
    );

    let request = &backend.requests()[0];
    assert!(request.prompt.starts_with("<start_of_turn>user\nYou are Hobbes. A philosophical tiger."));
    assert!(request.prompt.contains("] alice: hi Hobbes<end_of_turn>"));
    assert!(request.prompt.ends_with("<start_of_turn>model\nHobbes:"));
    assert_eq!(request.stop_sequence[0], "<end_of_turn>");
    assert!(request.stop_sequence.contains(&"\nalice:".to_string()));
    assert_eq!(request.sampler.max_length, 250);
}

#[tokio::test(start_paused = true)]
async fn e2e_sentinel_keeps_the_bot_silent() {
    let backend = Arc::new(ScriptedKobold::polling(&["<no_message>"]));
    let channel = chat(
        &AppConfig::default(),
        b"hobbes, stay quiet\n",
        backend,
        Arc::new(EventBus::default()),
    )
    .await;

    let transcript = channel.transcript();
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript[0].author, "alice");
}

#[tokio::test(start_paused = true)]
async fn e2e_tagged_output_waits_for_closing_tag() {
    let mut config = AppConfig::default();
    config.response.output_tags = Some(koboldcord_config::OutputTags {
        open: "<reply>".into(),
        close: "</reply>".into(),
    });
    let backend = Arc::new(ScriptedKobold::polling(&[
        "<think>short</think><reply>Purr",
        "<think>short</think><reply>Purr.</reply>",
        "<think>short</think><reply>Purr.</reply>",
    ]));
    let channel = chat(&config, b"pet Hobbes\n", backend, Arc::new(EventBus::default())).await;

    let transcript = channel.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1].content, "Purr.");
}

// ── E2E: Sync mode ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn e2e_sync_mode_sends_final_text_once() {
    let mut config = AppConfig::default();
    config.backend.mode = BackendMode::Sync;
    let backend = Arc::new(ScriptedKobold::sync("Hobbes: Tuna, obviously.\nalice:"));
    let channel = chat(&config, b"Hobbes, lunch?\n", backend.clone(), Arc::new(EventBus::default())).await;

    let transcript = channel.transcript();
    assert_eq!(transcript[1].content, "Tuna, obviously.");
    assert_eq!(backend.checks(), 0);
    assert_eq!(backend.requests().len(), 1);
}

// ── E2E: Config + persona files ──────────────────────────────────────────

#[test]
fn e2e_config_and_persona_files_load_together() {
    let dir = tempfile::tempdir().unwrap();
    let prompt_dir = dir.path().join("prompt");
    std::fs::create_dir_all(prompt_dir.join("persona")).unwrap();
    std::fs::create_dir_all(prompt_dir.join("system")).unwrap();
    std::fs::write(prompt_dir.join("persona/Hobbes.txt"), "A stuffed tiger.\n").unwrap();
    std::fs::write(
        prompt_dir.join("system/mistral.txt"),
        "You are {persona}. {personaDescription}\n",
    )
    .unwrap();

    let config_path = dir.path().join("koboldcord.toml");
    std::fs::write(
        &config_path,
        format!(
            "persona = \"Hobbes\"\ntemplate = \"mistral\"\n\n[prompt]\ndir = {:?}\nsystem_prompt = \"mistral.txt\"\n\n[backend]\nmode = \"sync\"\n",
            prompt_dir.display().to_string()
        ),
    )
    .unwrap();

    let config = AppConfig::load(Some(config_path.as_path())).unwrap();
    assert_eq!(config.backend.mode, BackendMode::Sync);

    let persona = config.load_persona().unwrap();
    assert_eq!(persona.name, "Hobbes");
    assert_eq!(persona.description, "A stuffed tiger.");
    assert_eq!(persona.system_prompt.family(), TemplateFamily::Instruct);

    // A TurnTag prompt file is rejected for the Instruct family
    std::fs::write(
        prompt_dir.join("system/mistral.txt"),
        "You are {persona}. {personaDescription}{conversationBody}",
    )
    .unwrap();
    assert!(config.load_persona().is_err());
}

#[test]
fn e2e_dotenv_file_supplies_env_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let env_path = dir.path().join(".env");
    std::fs::write(
        &env_path,
        "# bot secrets\nDISCORD_TOKEN=from-dotenv\nAPI_URL=\"http://gpu-box:5001\"\nPERSONA=Calvin\n",
    )
    .unwrap();

    let vars: std::collections::HashMap<String, String> = dotenvy::from_path_iter(&env_path)
        .unwrap()
        .map(|item| item.unwrap())
        .collect();

    let mut config = AppConfig::default();
    config.apply_env_overrides(|key| vars.get(key).cloned());

    assert!(config.has_discord_token());
    assert_eq!(config.discord.bot_token.as_deref(), Some("from-dotenv"));
    assert_eq!(config.backend.api_url, "http://gpu-box:5001");
    assert_eq!(config.persona, "Calvin");
    config.validate().unwrap();
}
