use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{read_json, write_json};

/// Durable home for primitive UI fields (drafts, toggles): one JSON file per
/// field key under `dir`.
#[derive(Debug, Clone)]
pub struct ScalarStore {
    dir: PathBuf,
}

impl ScalarStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key(key)))
    }

    /// Stored value for `key`, or `default` when the slot is missing or does
    /// not deserialize as `T`.
    pub fn load<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        read_json(&self.path_for(key))
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or(default)
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let path = self.path_for(key);
        let payload = serde_json::to_value(value)
            .with_context(|| format!("failed to serialize field '{key}'"))?;
        write_json(&path, &payload).with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn remove(&self, key: &str) -> anyhow::Result<()> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
        }
    }

}

fn sanitize_key(key: &str) -> String {
    let cleaned: String = key
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|ch| ch == '.') {
        return "_".to_string();
    }
    cleaned
}
