use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type EventPayload = Map<String, Value>;

/// Everything the studio writes to `events.jsonl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StudioEvent {
    ChatReady,
    ChatSubmitted,
    ChatCompleted,
    ChatFailed,
    ModelSwitched,
    SessionCreated,
    SessionDeleted,
    PanelStarted,
    PanelFinished,
    PanelFailed,
    CredentialInvalidated,
}

impl StudioEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatReady => "chat_ready",
            Self::ChatSubmitted => "chat_submitted",
            Self::ChatCompleted => "chat_completed",
            Self::ChatFailed => "chat_failed",
            Self::ModelSwitched => "model_switched",
            Self::SessionCreated => "session_created",
            Self::SessionDeleted => "session_deleted",
            Self::PanelStarted => "panel_started",
            Self::PanelFinished => "panel_finished",
            Self::PanelFailed => "panel_failed",
            Self::CredentialInvalidated => "credential_invalidated",
        }
    }
}

/// Activity log of one studio process.
///
/// Each line is a compact JSON object: `type` (a [`StudioEvent`]),
/// `invocation_id` shared by every line of the process, `ts` in RFC3339 with
/// microseconds, then the event's own fields. Event fields never replace the
/// three header fields.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventLog>,
}

#[derive(Debug)]
struct EventLog {
    path: PathBuf,
    invocation_id: String,
    append: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, invocation_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventLog {
                path: path.into(),
                invocation_id: invocation_id.into(),
                append: Mutex::new(()),
            }),
        }
    }

    /// Writer tagged with a fresh random invocation id.
    pub fn for_invocation(path: impl Into<PathBuf>) -> Self {
        Self::new(path, Uuid::new_v4().to_string())
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn invocation_id(&self) -> &str {
        &self.inner.invocation_id
    }

    pub fn emit(&self, event: StudioEvent, fields: EventPayload) -> anyhow::Result<Value> {
        let mut line = Map::new();
        line.insert("type".to_string(), Value::from(event.as_str()));
        line.insert(
            "invocation_id".to_string(),
            Value::from(self.inner.invocation_id.as_str()),
        );
        line.insert(
            "ts".to_string(),
            Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
        );
        for (key, value) in fields {
            line.entry(key).or_insert(value);
        }
        let encoded = serde_json::to_string(&line)?;

        if let Some(parent) = self.inner.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let _append = self
            .inner
            .append
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        writeln!(file, "{encoded}")?;

        Ok(Value::Object(line))
    }

    /// [`EventWriter::emit`] for callers that must not fail because the log
    /// is unwritable.
    pub fn record(&self, event: StudioEvent, fields: EventPayload) {
        let _ = self.emit(event, fields);
    }
}

/// Builds event fields from `(key, value)` pairs.
pub fn payload<I, K>(entries: I) -> EventPayload
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    entries
        .into_iter()
        .map(|(key, value)| (key.into(), value))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;
    use serde_json::{json, Value};

    use super::{payload, EventPayload, EventWriter, StudioEvent};

    fn logged(path: &std::path::Path) -> anyhow::Result<Vec<Value>> {
        fs::read_to_string(path)?
            .lines()
            .map(|line| serde_json::from_str::<Value>(line).map_err(anyhow::Error::from))
            .collect()
    }

    #[test]
    fn session_created_line_carries_header_and_fields() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "inv-123");

        let emitted = writer.emit(
            StudioEvent::SessionCreated,
            payload([("session_id", json!("s-1")), ("title", json!("Hello"))]),
        )?;

        let lines = logged(&path)?;
        assert_eq!(lines, vec![emitted]);
        assert_eq!(lines[0]["type"], json!("session_created"));
        assert_eq!(lines[0]["invocation_id"], json!("inv-123"));
        assert_eq!(lines[0]["title"], json!("Hello"));
        DateTime::parse_from_rfc3339(lines[0]["ts"].as_str().unwrap_or(""))?;
        Ok(())
    }

    #[test]
    fn event_fields_cannot_replace_header() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let writer = EventWriter::new(temp.path().join("events.jsonl"), "inv-123");

        let emitted = writer.emit(
            StudioEvent::ChatFailed,
            payload([("type", json!("spoofed")), ("stage", json!("submit"))]),
        )?;

        assert_eq!(emitted["type"], json!("chat_failed"));
        assert_eq!(emitted["stage"], json!("submit"));
        Ok(())
    }

    #[test]
    fn one_process_shares_an_invocation_id() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("state").join("events.jsonl");
        let writer = EventWriter::for_invocation(&path);
        let clone = writer.clone();

        writer.record(StudioEvent::PanelStarted, payload([("panel", json!("search"))]));
        clone.record(StudioEvent::PanelFinished, payload([("panel", json!("search"))]));

        let lines = logged(&path)?;
        let types: Vec<&str> = lines.iter().filter_map(|row| row["type"].as_str()).collect();
        assert_eq!(types, vec!["panel_started", "panel_finished"]);
        assert_eq!(lines[0]["invocation_id"], lines[1]["invocation_id"]);
        assert_eq!(lines[0]["invocation_id"], json!(writer.invocation_id()));
        Ok(())
    }

    #[test]
    fn unwritable_log_does_not_fail_record() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        fs::create_dir_all(&path)?;
        let writer = EventWriter::new(&path, "inv");

        writer.record(StudioEvent::CredentialInvalidated, EventPayload::new());
        assert!(writer.emit(StudioEvent::ChatFailed, EventPayload::new()).is_err());
        Ok(())
    }
}
