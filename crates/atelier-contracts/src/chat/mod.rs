mod command_parser;
mod command_registry;
mod session;
mod transcript;

pub use command_parser::{parse_command, ShellCommand};
pub use command_registry::CHAT_HELP_COMMANDS;
pub use session::{derive_title, ChatSession, Role, ChatTurn, TITLE_MAX_CHARS};
pub use transcript::{Exchange, ExchangeState, Transcript};
