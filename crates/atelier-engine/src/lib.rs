pub mod animation;
pub mod chat;
pub mod credentials;
pub mod dryrun;
pub mod gateway;
pub mod gemini;
pub mod panels;
pub mod studio;

pub use chat::{ChatController, ChatPhase, CompletedExchange, SubmitOutcome};
pub use credentials::{CredentialHost, Credentials, EnvCredentialHost, StaticCredentialHost};
pub use dryrun::DryrunGateway;
pub use gateway::{AspectRatio, ChatHandle, FragmentStream, Gateway, VideoReference};
pub use gemini::{GatewayConfig, GeminiGateway};
pub use studio::{Studio, StudioPaths};
