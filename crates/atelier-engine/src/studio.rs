use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use atelier_contracts::chat::ChatSession;
use atelier_contracts::error::GatewayResult;
use atelier_contracts::events::{payload, EventWriter, StudioEvent};
use atelier_contracts::models::{ModelRegistry, ModelSelector};
use atelier_contracts::store::{ScalarStore, SessionStore};
use serde_json::{json, Value};

use crate::chat::{ChatController, SubmitOutcome};
use crate::gateway::Gateway;
use crate::panels::{Panel, PanelRun};

/// On-disk layout of a studio state directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudioPaths {
    pub root: PathBuf,
    pub sessions: PathBuf,
    pub fields: PathBuf,
    pub events: PathBuf,
}

impl StudioPaths {
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            sessions: root.join("sessions.json"),
            fields: root.join("fields"),
            events: root.join("events.jsonl"),
            root,
        }
    }
}

/// Stores, event log, chat controller and gateway for one state directory.
pub struct Studio {
    paths: StudioPaths,
    gateway: Arc<dyn Gateway>,
    sessions: SessionStore,
    fields: ScalarStore,
    events: EventWriter,
    chat: ChatController,
}

impl Studio {
    pub fn open(
        root: impl Into<PathBuf>,
        gateway: Arc<dyn Gateway>,
        registry: ModelRegistry,
    ) -> Result<Self> {
        let paths = StudioPaths::from_root(root);
        fs::create_dir_all(&paths.fields)
            .with_context(|| format!("failed to create {}", paths.fields.display()))?;
        let sessions = SessionStore::load(&paths.sessions);
        let fields = ScalarStore::new(&paths.fields);
        let events = EventWriter::for_invocation(&paths.events);
        let chat = ChatController::new(gateway.clone(), ModelSelector::new(Some(registry)))
            .with_events(events.clone());
        Ok(Self {
            paths,
            gateway,
            sessions,
            fields,
            events,
            chat,
        })
    }

    pub fn paths(&self) -> &StudioPaths {
        &self.paths
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn gateway(&self) -> &dyn Gateway {
        self.gateway.as_ref()
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn fields(&self) -> &ScalarStore {
        &self.fields
    }

    pub fn events(&self) -> &EventWriter {
        &self.events
    }

    pub fn chat(&self) -> &ChatController {
        &self.chat
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.chat.selector().registry
    }

    pub fn activate_chat(&mut self, session: Option<&str>) -> GatewayResult<()> {
        self.chat.activate(&self.sessions, session)
    }

    pub fn new_chat(&mut self) -> GatewayResult<()> {
        self.chat.new_chat(&self.sessions)
    }

    pub fn submit_chat(&mut self, input: &str, on_fragment: impl FnMut(&str)) -> Result<SubmitOutcome> {
        self.chat.submit(&mut self.sessions, input, on_fragment)
    }

    pub fn switch_model(&mut self, model: &str) -> Result<bool> {
        self.chat.switch_model(&mut self.sessions, model)
    }

    /// Deletes the session matching `key` (id, 1-based index or unique id
    /// prefix). Deleting the active session leaves the chat on an empty
    /// conversation.
    pub fn delete_session(&mut self, key: &str) -> Result<Option<ChatSession>> {
        let Some(session) = self.sessions.resolve(key).cloned() else {
            return Ok(None);
        };
        self.sessions.delete(&session.id)?;
        self.record(
            StudioEvent::SessionDeleted,
            vec![("session_id", json!(session.id)), ("title", json!(session.title))],
        );
        if self.chat.active_session() == Some(session.id.as_str()) {
            // A failed reopen is reported through the chat phase.
            let _ = self.chat.new_chat(&self.sessions);
        }
        Ok(Some(session))
    }

    /// Last prompt typed into `panel`, or empty.
    pub fn draft(&self, panel: &str) -> String {
        self.fields.load(&draft_key(panel), String::new())
    }

    pub fn save_draft(&self, panel: &str, prompt: &str) -> Result<()> {
        self.fields.set(&draft_key(panel), &prompt.to_string())
    }

    /// A non-blank `prompt` replaces the panel's draft; otherwise the saved
    /// draft is used.
    pub fn resolve_prompt(&self, panel: &str, prompt: Option<&str>) -> Result<String> {
        match prompt.map(str::trim).filter(|value| !value.is_empty()) {
            Some(prompt) => {
                self.save_draft(panel, prompt)?;
                Ok(prompt.to_string())
            }
            None => Ok(self.draft(panel)),
        }
    }

    /// Runs one panel operation against the studio gateway and logs it.
    pub fn run_panel<P: Panel>(
        &self,
        panel: &mut P,
        drive: impl FnOnce(&mut P, &dyn Gateway) -> PanelRun,
    ) -> PanelRun {
        let started = Instant::now();
        self.record(
            StudioEvent::PanelStarted,
            vec![
                ("panel", json!(panel.name())),
                ("gateway", json!(self.gateway.name())),
            ],
        );
        let run = drive(panel, self.gateway.as_ref());
        let duration_ms = started.elapsed().as_millis() as u64;
        match run {
            PanelRun::Failed => self.record(
                StudioEvent::PanelFailed,
                vec![
                    ("panel", json!(panel.name())),
                    ("error", json!(panel.error())),
                    ("duration_ms", json!(duration_ms)),
                ],
            ),
            PanelRun::Succeeded | PanelRun::Skipped => self.record(
                StudioEvent::PanelFinished,
                vec![
                    ("panel", json!(panel.name())),
                    ("skipped", json!(run == PanelRun::Skipped)),
                    ("duration_ms", json!(duration_ms)),
                ],
            ),
        }
        run
    }

    fn record(&self, event: StudioEvent, entries: Vec<(&str, Value)>) {
        self.events.record(event, payload(entries));
    }
}

fn draft_key(panel: &str) -> String {
    format!("{panel}.prompt")
}
