use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde_json::{Map, Value};

use super::{read_json, write_json};
use crate::chat::{derive_title, ChatSession, ChatTurn, Role};

const UNTITLED: &str = "New chat";

/// Ordered list of chat sessions, newest first, mirrored to one JSON file.
///
/// Every mutation rewrites the whole list; loading tolerates a missing or
/// corrupted file and repairs individual records instead of failing.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStore {
    path: PathBuf,
    sessions: Vec<ChatSession>,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sessions: Vec::new(),
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Self {
        let mut store = Self::new(path);
        let payload = read_json(&store.path).unwrap_or(Value::Array(Vec::new()));
        let Some(records) = payload.as_array() else {
            return store;
        };

        let mut seen = HashSet::new();
        for record in records {
            let Some(session) = record.as_object().and_then(parse_session) else {
                continue;
            };
            if !seen.insert(session.id.clone()) {
                continue;
            }
            store.sessions.push(session);
        }
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|session| session.id == id)
    }

    /// Finds a session by exact id, by 1-based position in the listing, or by
    /// a unique id prefix.
    pub fn resolve(&self, key: &str) -> Option<&ChatSession> {
        let key = key.trim();
        if key.is_empty() {
            return None;
        }
        if let Some(session) = self.get(key) {
            return Some(session);
        }
        if let Ok(index) = key.parse::<usize>() {
            if index >= 1 {
                return self.sessions.get(index - 1);
            }
            return None;
        }
        let mut matches = self
            .sessions
            .iter()
            .filter(|session| session.id.starts_with(key));
        let first = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(first)
    }

    /// Registers a new session at the top of the list. An existing session
    /// with the same id is replaced in place.
    pub fn insert(&mut self, session: ChatSession) -> anyhow::Result<()> {
        if let Some(existing) = self.get_mut(&session.id) {
            *existing = session;
        } else {
            self.sessions.insert(0, session);
        }
        self.save()
    }

    pub fn update_turns(&mut self, id: &str, turns: Vec<ChatTurn>) -> anyhow::Result<bool> {
        let Some(session) = self.get_mut(id) else {
            return Ok(false);
        };
        session.turns = turns;
        self.save()?;
        Ok(true)
    }

    pub fn set_model(&mut self, id: &str, model: &str) -> anyhow::Result<bool> {
        let Some(session) = self.get_mut(id) else {
            return Ok(false);
        };
        session.model = model.to_string();
        self.save()?;
        Ok(true)
    }

    pub fn delete(&mut self, id: &str) -> anyhow::Result<bool> {
        let before = self.sessions.len();
        self.sessions.retain(|session| session.id != id);
        if self.sessions.len() == before {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let payload = serde_json::to_value(&self.sessions)?;
        write_json(&self.path, &payload)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut ChatSession> {
        self.sessions.iter_mut().find(|session| session.id == id)
    }
}

fn parse_session(obj: &Map<String, Value>) -> Option<ChatSession> {
    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())?
        .to_string();

    let turns: Vec<ChatTurn> = obj
        .get("turns")
        .or_else(|| obj.get("messages"))
        .and_then(Value::as_array)
        .map(|rows| rows.iter().filter_map(parse_turn).collect())
        .unwrap_or_default();

    let title = obj
        .get("title")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .or_else(|| {
            turns
                .iter()
                .find(|turn| turn.role == Role::User)
                .map(|turn| derive_title(&turn.content))
        })
        .unwrap_or_else(|| UNTITLED.to_string());

    let model = obj
        .get("model")
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or("")
        .to_string();

    Some(ChatSession {
        id,
        title,
        turns,
        model,
    })
}

fn parse_turn(value: &Value) -> Option<ChatTurn> {
    let obj = value.as_object()?;
    let content = obj
        .get("content")
        .or_else(|| obj.get("text"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if content.is_empty() {
        return None;
    }
    let role = obj
        .get("role")
        .and_then(Value::as_str)
        .map(Role::from_persisted)
        .unwrap_or(Role::User);
    Some(ChatTurn {
        role,
        content: content.to_string(),
    })
}
