use std::fmt;

use atelier_contracts::chat::ChatTurn;
use atelier_contracts::error::GatewayResult;
use atelier_contracts::media::ImagePayload;
use atelier_contracts::search::SearchResult;
use atelier_contracts::speech::SpeechAudio;

/// Lazy, finite, non-restartable sequence of streamed reply fragments.
pub type FragmentStream<'a> = Box<dyn Iterator<Item = GatewayResult<String>> + 'a>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AspectRatio {
    #[default]
    Landscape,
    Portrait,
}

impl AspectRatio {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Landscape => "16:9",
            Self::Portrait => "9:16",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "16:9" | "landscape" | "wide" => Some(Self::Landscape),
            "9:16" | "portrait" | "tall" => Some(Self::Portrait),
            _ => None,
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Downloadable result of a finished animation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoReference {
    pub uri: String,
}

/// A stateful conversation with the provider.
pub trait ChatHandle: Send {
    fn model(&self) -> &str;

    /// Sends one user message. The user turn and the finished reply join the
    /// conversation only once the returned stream is exhausted without error.
    fn send<'a>(&'a mut self, text: &str) -> GatewayResult<FragmentStream<'a>>;
}

/// Boundary over the hosted generative-AI provider.
///
/// Every operation acquires a credential before touching the network and
/// fails with `CredentialUnavailable` when none can be provisioned.
pub trait Gateway: Send + Sync {
    fn name(&self) -> &str;

    fn edit_image(&self, image: &ImagePayload, instruction: &str) -> GatewayResult<ImagePayload>;

    fn generate_image(&self, instruction: &str) -> GatewayResult<ImagePayload>;

    fn analyze_image(&self, image: &ImagePayload, instruction: &str) -> GatewayResult<String>;

    fn web_search(&self, query: &str) -> GatewayResult<SearchResult>;

    /// Blocks until the provider reports the animation done or failed.
    fn animate_image(
        &self,
        image: &ImagePayload,
        instruction: &str,
        aspect_ratio: AspectRatio,
    ) -> GatewayResult<VideoReference>;

    fn download_video(&self, video: &VideoReference) -> GatewayResult<Vec<u8>>;

    fn text_to_speech(&self, text: &str) -> GatewayResult<SpeechAudio>;

    fn open_chat(&self, model: &str, prior_turns: &[ChatTurn]) -> GatewayResult<Box<dyn ChatHandle>>;
}

#[cfg(test)]
mod tests {
    use super::AspectRatio;

    #[test]
    fn aspect_ratio_parses_aliases() {
        assert_eq!(AspectRatio::parse("9:16"), Some(AspectRatio::Portrait));
        assert_eq!(AspectRatio::parse(" Landscape "), Some(AspectRatio::Landscape));
        assert_eq!(AspectRatio::parse("4:3"), None);
        assert_eq!(AspectRatio::default().to_string(), "16:9");
    }
}
