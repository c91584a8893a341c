use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, TextCommandSpec, NO_ARG_COMMANDS, PATH_PROMPT_COMMANDS, TEXT_ARG_COMMANDS,
};

/// One line typed into the chat shell, classified.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellCommand {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub args: BTreeMap<String, Value>,
}

impl ShellCommand {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            args: BTreeMap::new(),
        }
    }

    /// String argument, empty when absent.
    pub fn arg(&self, key: &str) -> &str {
        self.args.get(key).and_then(Value::as_str).unwrap_or("")
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn find_text_command(command: &str) -> Option<&'static TextCommandSpec> {
    TEXT_ARG_COMMANDS.iter().find(|spec| spec.command == command)
}

fn split_words(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn is_aspect_ratio(token: &str) -> bool {
    matches!(token, "16:9" | "9:16")
}

fn parse_path_prompt(action: &str, arg: &str, intent: &mut ShellCommand) {
    let mut parts = split_words(arg).into_iter();
    let path = parts.next().unwrap_or_default();
    let mut rest: Vec<String> = parts.collect();
    if action == "animate" {
        let ratio = match rest.first() {
            Some(first) if is_aspect_ratio(first) => Some(rest.remove(0)),
            _ => None,
        };
        intent.args.insert(
            "aspect_ratio".to_string(),
            ratio.map(Value::String).unwrap_or(Value::Null),
        );
    }
    intent.args.insert("path".to_string(), Value::String(path));
    intent
        .args
        .insert("prompt".to_string(), Value::String(rest.join(" ")));
}

pub fn parse_command(text: &str) -> ShellCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return ShellCommand::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(spec) = find_text_command(&command) {
                let mut intent = ShellCommand::new(spec.action, text);
                intent
                    .args
                    .insert(spec.key.to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, PATH_PROMPT_COMMANDS) {
                let mut intent = ShellCommand::new(action, text);
                parse_path_prompt(action, arg, &mut intent);
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return ShellCommand::new(action, text);
            }

            let mut intent = ShellCommand::new("unknown", text);
            intent
                .args
                .insert("command".to_string(), Value::String(command));
            intent
                .args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = ShellCommand::new("chat", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}
