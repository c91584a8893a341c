use std::sync::Arc;

use anyhow::{bail, Result};
use atelier_contracts::chat::{ChatSession, ChatTurn, Exchange, Transcript};
use atelier_contracts::error::{GatewayError, GatewayResult};
use atelier_contracts::events::{payload, EventWriter, StudioEvent};
use atelier_contracts::models::{Capability, ModelSelector};
use atelier_contracts::store::SessionStore;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::gateway::{ChatHandle, Gateway};

/// Failure reported when a stream ends without any reply text.
pub const EMPTY_REPLY: &str = "model returned an empty reply";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatPhase {
    Uninitialized,
    Ready,
    Streaming,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedExchange {
    pub session_id: String,
    /// `true` when this exchange created the session.
    pub created: bool,
    pub reply: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank input, or the controller was not accepting submissions.
    Ignored,
    Completed(CompletedExchange),
    Failed(GatewayError),
}

/// Owns the active conversation: its transcript, the provider chat stream
/// and the link to the persisted session.
///
/// At most one exchange is in flight. The transcript only ever holds
/// committed turns plus the exchange being streamed.
pub struct ChatController {
    gateway: Arc<dyn Gateway>,
    selector: ModelSelector,
    events: Option<EventWriter>,
    phase: ChatPhase,
    model: String,
    active_session: Option<String>,
    transcript: Transcript,
    chat: Option<Box<dyn ChatHandle>>,
    exchange: Option<Exchange>,
    pending_input: String,
}

impl ChatController {
    pub fn new(gateway: Arc<dyn Gateway>, selector: ModelSelector) -> Self {
        Self {
            gateway,
            selector,
            events: None,
            phase: ChatPhase::Uninitialized,
            model: String::new(),
            active_session: None,
            transcript: Transcript::new(),
            chat: None,
            exchange: None,
            pending_input: String::new(),
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn phase(&self) -> &ChatPhase {
        &self.phase
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn active_session(&self) -> Option<&str> {
        self.active_session.as_deref()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn turns(&self) -> &[ChatTurn] {
        self.transcript.turns()
    }

    pub fn selector(&self) -> &ModelSelector {
        &self.selector
    }

    /// Loads `session_id` (or an empty conversation) and opens a chat stream
    /// for it. A session with a missing or unknown model falls back to the
    /// registry's default chat model.
    pub fn activate(&mut self, store: &SessionStore, session_id: Option<&str>) -> GatewayResult<()> {
        let session = session_id.and_then(|key| store.resolve(key));
        let (active_session, turns, requested) = match session {
            Some(session) => (
                Some(session.id.clone()),
                session.turns.clone(),
                Some(session.model.clone()),
            ),
            None => (None, Vec::new(), Some(self.model.clone())),
        };

        self.exchange = None;
        self.pending_input.clear();
        self.chat = None;
        self.active_session = active_session;
        self.transcript = Transcript::from_turns(turns);

        let selection = match self.selector.select(requested.as_deref(), Capability::Chat) {
            Ok(selection) => selection,
            Err(message) => {
                let err = GatewayError::transport(message);
                self.fail("activate", &err);
                return Err(err);
            }
        };
        self.model = selection.model.name;
        self.open_chat("activate")?;
        self.record(
            StudioEvent::ChatReady,
            vec![
                ("session_id", json!(self.active_session)),
                ("model", json!(self.model)),
                ("turns", json!(self.transcript.len())),
                ("fallback_reason", json!(selection.fallback_reason)),
            ],
        );
        Ok(())
    }

    /// Starts an empty conversation on the current model.
    pub fn new_chat(&mut self, store: &SessionStore) -> GatewayResult<()> {
        self.activate(store, None)
    }

    /// Reopens the chat stream on `model` with the same turns and persists
    /// the choice on the active session. Returns `false` when the controller
    /// is not in a state that accepts a model change.
    pub fn switch_model(&mut self, store: &mut SessionStore, model: &str) -> Result<bool> {
        if matches!(self.phase, ChatPhase::Uninitialized | ChatPhase::Streaming) {
            return Ok(false);
        }
        let model = model.trim();
        let Some(spec) = self.selector.registry.ensure(model, Capability::Chat) else {
            bail!("model '{model}' is not available for chat");
        };
        let previous = std::mem::replace(&mut self.model, spec.name);
        if let Some(id) = &self.active_session {
            store.set_model(id, &self.model)?;
        }
        self.chat = None;
        self.open_chat("switch_model")?;
        self.record(
            StudioEvent::ModelSwitched,
            vec![
                ("session_id", json!(self.active_session)),
                ("from", json!(previous)),
                ("to", json!(self.model)),
            ],
        );
        Ok(true)
    }

    /// Runs one full exchange, handing each fragment to `on_fragment` as it
    /// arrives.
    pub fn submit(
        &mut self,
        store: &mut SessionStore,
        input: &str,
        mut on_fragment: impl FnMut(&str),
    ) -> Result<SubmitOutcome> {
        let input = input.trim().to_string();
        match self.begin_submit(&input) {
            Ok(true) => {}
            Ok(false) => return Ok(SubmitOutcome::Ignored),
            Err(err) => return Ok(SubmitOutcome::Failed(err)),
        }

        let Some(mut chat) = self.chat.take() else {
            let err = GatewayError::transport("chat stream is not open");
            self.abort_submit(&err);
            return Ok(SubmitOutcome::Failed(err));
        };
        let streamed = self.stream_reply(chat.as_mut(), &input, &mut on_fragment);
        self.chat = Some(chat);

        match streamed.and_then(|()| self.require_reply()) {
            Ok(()) => Ok(SubmitOutcome::Completed(self.finish_submit(store)?)),
            Err(err) => {
                self.abort_submit(&err);
                Ok(SubmitOutcome::Failed(err))
            }
        }
    }

    fn stream_reply(
        &mut self,
        chat: &mut dyn ChatHandle,
        input: &str,
        on_fragment: &mut impl FnMut(&str),
    ) -> GatewayResult<()> {
        let stream = chat.send(input)?;
        for fragment in stream {
            let fragment = fragment?;
            self.push_fragment(&fragment);
            on_fragment(&fragment);
        }
        Ok(())
    }

    /// Opens an exchange for `input`: the user turn and an empty assistant
    /// turn are appended and the phase becomes `Streaming`.
    ///
    /// Returns `Ok(false)` without touching anything for blank input, before
    /// activation, or while another exchange is streaming.
    pub fn begin_submit(&mut self, input: &str) -> GatewayResult<bool> {
        let input = input.trim();
        if input.is_empty()
            || matches!(self.phase, ChatPhase::Uninitialized | ChatPhase::Streaming)
        {
            return Ok(false);
        }
        if self.chat.is_none() {
            self.open_chat("submit")?;
        }
        self.exchange = Some(self.transcript.begin_exchange(input));
        self.pending_input = input.to_string();
        self.phase = ChatPhase::Streaming;
        self.record(
            StudioEvent::ChatSubmitted,
            vec![
                ("session_id", json!(self.active_session)),
                ("model", json!(self.model)),
                ("chars", json!(input.chars().count())),
            ],
        );
        Ok(true)
    }

    /// Appends one streamed fragment to the in-flight assistant turn.
    pub fn push_fragment(&mut self, fragment: &str) -> bool {
        if self.phase != ChatPhase::Streaming {
            return false;
        }
        match &self.exchange {
            Some(exchange) => exchange.append(&mut self.transcript, fragment),
            None => false,
        }
    }

    /// Commits the in-flight exchange and writes it to `store`: a first
    /// exchange creates and activates a new session, later ones overwrite
    /// the active session's turns.
    /// An exchange whose reply is still empty is rolled back instead.
    pub fn finish_submit(&mut self, store: &mut SessionStore) -> Result<CompletedExchange> {
        if self.exchange.is_none() {
            bail!("no chat exchange in progress");
        }
        if let Err(err) = self.require_reply() {
            self.abort_submit(&err);
            return Err(err.into());
        }
        let Some(mut exchange) = self.exchange.take() else {
            bail!("no chat exchange in progress");
        };
        let reply = exchange.assistant_text(&self.transcript).to_string();
        exchange.commit();
        self.phase = ChatPhase::Ready;
        let input = std::mem::take(&mut self.pending_input);
        let turns = self.transcript.turns().to_vec();

        let updated = match &self.active_session {
            Some(id) => store.update_turns(id, turns.clone())?,
            None => false,
        };
        let (session_id, created) = if updated {
            (self.active_session.clone().unwrap_or_default(), false)
        } else {
            let session = ChatSession::new(Uuid::new_v4().to_string(), &input, turns, &self.model);
            let id = session.id.clone();
            let title = session.title.clone();
            store.insert(session)?;
            self.active_session = Some(id.clone());
            self.record(
                StudioEvent::SessionCreated,
                vec![("session_id", json!(id)), ("title", json!(title))],
            );
            (id, true)
        };

        self.record(
            StudioEvent::ChatCompleted,
            vec![
                ("session_id", json!(session_id)),
                ("model", json!(self.model)),
                ("reply_chars", json!(reply.chars().count())),
            ],
        );
        Ok(CompletedExchange {
            session_id,
            created,
            reply,
        })
    }

    fn require_reply(&self) -> GatewayResult<()> {
        let empty = self
            .exchange
            .as_ref()
            .is_some_and(|exchange| exchange.assistant_text(&self.transcript).is_empty());
        if empty {
            return Err(GatewayError::transport(EMPTY_REPLY));
        }
        Ok(())
    }

    /// Rolls the in-flight exchange back, restoring the transcript exactly,
    /// and moves to `Error`.
    pub fn abort_submit(&mut self, err: &GatewayError) {
        if let Some(mut exchange) = self.exchange.take() {
            exchange.rollback(&mut self.transcript);
        }
        self.pending_input.clear();
        self.fail("submit", err);
    }

    fn open_chat(&mut self, stage: &str) -> GatewayResult<()> {
        match self.gateway.open_chat(&self.model, self.transcript.turns()) {
            Ok(chat) => {
                self.chat = Some(chat);
                self.phase = ChatPhase::Ready;
                Ok(())
            }
            Err(err) => {
                self.fail(stage, &err);
                Err(err)
            }
        }
    }

    fn fail(&mut self, stage: &str, err: &GatewayError) {
        self.phase = ChatPhase::Error(err.to_string());
        self.record(
            StudioEvent::ChatFailed,
            vec![
                ("stage", json!(stage)),
                ("session_id", json!(self.active_session)),
                ("error_kind", json!(err.kind())),
                ("error", json!(err.to_string())),
            ],
        );
        if *err == GatewayError::CredentialInvalidated {
            self.record(StudioEvent::CredentialInvalidated, vec![("stage", json!(stage))]);
        }
    }

    fn record(&self, event: StudioEvent, entries: Vec<(&str, Value)>) {
        if let Some(events) = &self.events {
            events.record(event, payload(entries));
        }
    }
}
