#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole remainder is one free-text argument stored under `key`.
#[derive(Clone, Copy, Debug)]
pub(crate) struct TextCommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub key: &'static str,
}

pub(crate) const TEXT_ARG_COMMANDS: &[TextCommandSpec] = &[
    TextCommandSpec {
        command: "model",
        action: "set_model",
        key: "model",
    },
    TextCommandSpec {
        command: "open",
        action: "open_session",
        key: "session",
    },
    TextCommandSpec {
        command: "delete",
        action: "delete_session",
        key: "session",
    },
    TextCommandSpec {
        command: "image",
        action: "generate_image",
        key: "prompt",
    },
    TextCommandSpec {
        command: "search",
        action: "search",
        key: "query",
    },
    TextCommandSpec {
        command: "speak",
        action: "speak",
        key: "text",
    },
];

/// Commands taking an image path followed by an instruction.
pub(crate) const PATH_PROMPT_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "edit",
        action: "edit_image",
    },
    CommandSpec {
        command: "analyze",
        action: "analyze_image",
    },
    CommandSpec {
        command: "animate",
        action: "animate",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "new",
        action: "new_chat",
    },
    CommandSpec {
        command: "sessions",
        action: "list_sessions",
    },
    CommandSpec {
        command: "models",
        action: "list_models",
    },
    CommandSpec {
        command: "gold",
        action: "gold_price",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/help",
    "/new",
    "/sessions",
    "/open <id|number>",
    "/delete <id|number>",
    "/model <name>",
    "/models",
    "/image <prompt>",
    "/edit <path> <instruction>",
    "/analyze <path> <question>",
    "/animate <path> [16:9|9:16] <instruction>",
    "/search <query>",
    "/gold",
    "/speak <text>",
    "/quit",
];
