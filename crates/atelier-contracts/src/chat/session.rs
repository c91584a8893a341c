use serde::{Deserialize, Serialize};

/// Maximum number of characters kept from the first user input in a title.
pub const TITLE_MAX_CHARS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "model", alias = "assistant")]
    Assistant,
}

impl Role {
    /// Parses a persisted role. Anything unrecognized is treated as the user.
    pub fn from_persisted(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "model" | "assistant" => Self::Assistant,
            _ => Self::User,
        }
    }

    /// Role name used on the provider wire and in `sessions.json`.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub turns: Vec<ChatTurn>,
    pub model: String,
}

impl ChatSession {
    pub fn new(id: impl Into<String>, first_input: &str, turns: Vec<ChatTurn>, model: &str) -> Self {
        Self {
            id: id.into(),
            title: derive_title(first_input),
            turns,
            model: model.to_string(),
        }
    }
}

/// First [`TITLE_MAX_CHARS`] characters of `input`, with `...` appended when
/// anything was cut.
pub fn derive_title(input: &str) -> String {
    if input.chars().count() <= TITLE_MAX_CHARS {
        return input.to_string();
    }
    input.chars().take(TITLE_MAX_CHARS).collect::<String>() + "..."
}
