use atelier_contracts::error::{GatewayError, GatewayResult};
use atelier_contracts::media::ImagePayload;
use atelier_contracts::search::{parse_gold_price, GoldPriceSnapshot, SearchResult};
use atelier_contracts::speech::SpeechAudio;

use crate::gateway::{AspectRatio, Gateway, VideoReference};

/// Asks the search model for the spot price in a shape `parse_gold_price` reads.
pub const GOLD_PRICE_QUERY: &str = "What is the current spot price of gold in US dollars? \
Reply with only a JSON object of the form \
{\"pricePerOunce\": number, \"pricePerGram\": number, \"lastUpdated\": string} \
where the prices are USD per troy ounce and per gram.";

/// Result of asking a panel to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelRun {
    /// Nothing to do: empty prompt or missing source image.
    Skipped,
    Succeeded,
    Failed,
}

/// Loading flag, last error and last result of one panel.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelState<T> {
    loading: bool,
    error: Option<String>,
    result: Option<T>,
}

impl<T> Default for PanelState<T> {
    fn default() -> Self {
        Self {
            loading: false,
            error: None,
            result: None,
        }
    }
}

impl<T> PanelState<T> {
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn result(&self) -> Option<&T> {
        self.result.as_ref()
    }

    fn run(&mut self, operation: impl FnOnce() -> GatewayResult<T>) -> PanelRun {
        self.loading = true;
        self.error = None;
        self.result = None;
        let outcome = operation();
        self.loading = false;
        match outcome {
            Ok(value) => {
                self.result = Some(value);
                PanelRun::Succeeded
            }
            Err(err) => {
                self.error = Some(err.to_string());
                PanelRun::Failed
            }
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Common surface the studio uses to log panel runs.
pub trait Panel {
    fn name(&self) -> &'static str;

    fn error(&self) -> Option<&str>;
}

macro_rules! impl_panel {
    ($($panel:ty),+ $(,)?) => {
        $(
            impl Panel for $panel {
                fn name(&self) -> &'static str {
                    Self::NAME
                }

                fn error(&self) -> Option<&str> {
                    self.state.error()
                }
            }
        )+
    };
}

impl_panel!(
    ImageGeneratePanel,
    ImageEditPanel,
    ImageAnalyzePanel,
    VideoAnimatorPanel,
    SearchPanel,
    GoldPricePanel,
    SpeechPanel,
);

fn non_empty(prompt: &str) -> Option<&str> {
    let trimmed = prompt.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

#[derive(Debug, Clone, Default)]
pub struct ImageGeneratePanel {
    state: PanelState<ImagePayload>,
}

impl ImageGeneratePanel {
    pub const NAME: &'static str = "image_generate";

    pub fn state(&self) -> &PanelState<ImagePayload> {
        &self.state
    }

    pub fn generate(&mut self, gateway: &dyn Gateway, prompt: &str) -> PanelRun {
        let Some(prompt) = non_empty(prompt) else {
            return PanelRun::Skipped;
        };
        self.state.run(|| gateway.generate_image(prompt))
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageEditPanel {
    source: Option<ImagePayload>,
    state: PanelState<ImagePayload>,
}

impl ImageEditPanel {
    pub const NAME: &'static str = "image_edit";

    pub fn state(&self) -> &PanelState<ImagePayload> {
        &self.state
    }

    pub fn source(&self) -> Option<&ImagePayload> {
        self.source.as_ref()
    }

    pub fn set_source(&mut self, image: ImagePayload) {
        self.source = Some(image);
        self.state.reset();
    }

    pub fn edit(&mut self, gateway: &dyn Gateway, instruction: &str) -> PanelRun {
        let (Some(source), Some(instruction)) = (&self.source, non_empty(instruction)) else {
            return PanelRun::Skipped;
        };
        self.state.run(|| gateway.edit_image(source, instruction))
    }

    pub fn reset(&mut self) {
        self.source = None;
        self.state.reset();
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageAnalyzePanel {
    source: Option<ImagePayload>,
    state: PanelState<String>,
}

impl ImageAnalyzePanel {
    pub const NAME: &'static str = "image_analyze";

    pub fn state(&self) -> &PanelState<String> {
        &self.state
    }

    pub fn set_source(&mut self, image: ImagePayload) {
        self.source = Some(image);
        self.state.reset();
    }

    pub fn analyze(&mut self, gateway: &dyn Gateway, instruction: &str) -> PanelRun {
        let (Some(source), Some(instruction)) = (&self.source, non_empty(instruction)) else {
            return PanelRun::Skipped;
        };
        self.state.run(|| gateway.analyze_image(source, instruction))
    }

    pub fn reset(&mut self) {
        self.source = None;
        self.state.reset();
    }
}

/// Finished animation together with its downloaded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoClip {
    pub reference: VideoReference,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct VideoAnimatorPanel {
    source: Option<ImagePayload>,
    aspect_ratio: AspectRatio,
    state: PanelState<VideoClip>,
}

impl VideoAnimatorPanel {
    pub const NAME: &'static str = "video_animator";

    pub fn state(&self) -> &PanelState<VideoClip> {
        &self.state
    }

    pub fn aspect_ratio(&self) -> AspectRatio {
        self.aspect_ratio
    }

    pub fn set_aspect_ratio(&mut self, aspect_ratio: AspectRatio) {
        self.aspect_ratio = aspect_ratio;
    }

    pub fn set_source(&mut self, image: ImagePayload) {
        self.source = Some(image);
        self.state.reset();
    }

    /// Blocks through the whole animation, then downloads the clip.
    pub fn animate(&mut self, gateway: &dyn Gateway, prompt: &str) -> PanelRun {
        let (Some(source), Some(prompt)) = (&self.source, non_empty(prompt)) else {
            return PanelRun::Skipped;
        };
        let aspect_ratio = self.aspect_ratio;
        self.state.run(|| {
            let reference = gateway.animate_image(source, prompt, aspect_ratio)?;
            let bytes = gateway.download_video(&reference)?;
            Ok(VideoClip { reference, bytes })
        })
    }

    pub fn reset(&mut self) {
        self.source = None;
        self.state.reset();
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchPanel {
    state: PanelState<SearchResult>,
}

impl SearchPanel {
    pub const NAME: &'static str = "search";

    pub fn state(&self) -> &PanelState<SearchResult> {
        &self.state
    }

    pub fn search(&mut self, gateway: &dyn Gateway, query: &str) -> PanelRun {
        let Some(query) = non_empty(query) else {
            return PanelRun::Skipped;
        };
        self.state.run(|| gateway.web_search(query))
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }
}

#[derive(Debug, Clone, Default)]
pub struct GoldPricePanel {
    state: PanelState<GoldPriceSnapshot>,
}

impl GoldPricePanel {
    pub const NAME: &'static str = "gold_price";

    pub fn state(&self) -> &PanelState<GoldPriceSnapshot> {
        &self.state
    }

    pub fn refresh(&mut self, gateway: &dyn Gateway) -> PanelRun {
        self.state.run(|| {
            let answer = gateway.web_search(GOLD_PRICE_QUERY)?;
            parse_gold_price(&answer.text).ok_or_else(|| {
                GatewayError::transport("search answer did not contain gold prices")
            })
        })
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpeechPanel {
    state: PanelState<SpeechAudio>,
}

impl SpeechPanel {
    pub const NAME: &'static str = "speech";

    pub fn state(&self) -> &PanelState<SpeechAudio> {
        &self.state
    }

    pub fn speak(&mut self, gateway: &dyn Gateway, text: &str) -> PanelRun {
        let Some(text) = non_empty(text) else {
            return PanelRun::Skipped;
        };
        self.state.run(|| gateway.text_to_speech(text))
    }

    pub fn reset(&mut self) {
        self.state.reset();
    }
}

#[cfg(test)]
mod tests {
    use atelier_contracts::chat::ChatTurn;
    use atelier_contracts::error::{GatewayError, GatewayResult};
    use atelier_contracts::media::ImagePayload;
    use atelier_contracts::search::SearchResult;
    use atelier_contracts::speech::SpeechAudio;

    use super::{
        GoldPricePanel, ImageAnalyzePanel, ImageEditPanel, ImageGeneratePanel, PanelRun,
        SearchPanel, SpeechPanel, VideoAnimatorPanel,
    };
    use crate::dryrun::DryrunGateway;
    use crate::gateway::{AspectRatio, ChatHandle, Gateway, VideoReference};

    /// Every call fails with the configured error; search answers can be canned.
    struct FailingGateway {
        error: GatewayError,
        search_answer: Option<String>,
    }

    impl FailingGateway {
        fn new(error: GatewayError) -> Self {
            Self {
                error,
                search_answer: None,
            }
        }

        fn fail<T>(&self) -> GatewayResult<T> {
            Err(self.error.clone())
        }
    }

    impl Gateway for FailingGateway {
        fn name(&self) -> &str {
            "failing"
        }

        fn edit_image(&self, _: &ImagePayload, _: &str) -> GatewayResult<ImagePayload> {
            self.fail()
        }

        fn generate_image(&self, _: &str) -> GatewayResult<ImagePayload> {
            self.fail()
        }

        fn analyze_image(&self, _: &ImagePayload, _: &str) -> GatewayResult<String> {
            self.fail()
        }

        fn web_search(&self, _: &str) -> GatewayResult<SearchResult> {
            match &self.search_answer {
                Some(text) => Ok(SearchResult {
                    text: text.clone(),
                    citations: Vec::new(),
                }),
                None => self.fail(),
            }
        }

        fn animate_image(&self, _: &ImagePayload, _: &str, _: AspectRatio) -> GatewayResult<VideoReference> {
            self.fail()
        }

        fn download_video(&self, _: &VideoReference) -> GatewayResult<Vec<u8>> {
            self.fail()
        }

        fn text_to_speech(&self, _: &str) -> GatewayResult<SpeechAudio> {
            self.fail()
        }

        fn open_chat(&self, _: &str, _: &[ChatTurn]) -> GatewayResult<Box<dyn ChatHandle>> {
            self.fail()
        }
    }

    #[test]
    fn empty_prompts_are_no_ops() {
        let gateway = DryrunGateway;
        let mut generate = ImageGeneratePanel::default();
        let mut search = SearchPanel::default();
        let mut speech = SpeechPanel::default();
        assert_eq!(generate.generate(&gateway, "   "), PanelRun::Skipped);
        assert_eq!(search.search(&gateway, ""), PanelRun::Skipped);
        assert_eq!(speech.speak(&gateway, "\n"), PanelRun::Skipped);
        assert!(generate.state().result().is_none());
        assert!(search.state().error().is_none());
    }

    #[test]
    fn edit_requires_a_source_image() -> anyhow::Result<()> {
        let gateway = DryrunGateway;
        let mut panel = ImageEditPanel::default();
        assert_eq!(panel.edit(&gateway, "brighter"), PanelRun::Skipped);

        panel.set_source(gateway.generate_image("base")?);
        assert_eq!(panel.edit(&gateway, "brighter"), PanelRun::Succeeded);
        assert!(panel.state().result().is_some());
        assert!(!panel.state().is_loading());

        panel.reset();
        assert!(panel.source().is_none());
        assert!(panel.state().result().is_none());
        Ok(())
    }

    #[test]
    fn failures_stay_inside_the_panel() -> anyhow::Result<()> {
        let failing = FailingGateway::new(GatewayError::NoImageProduced);
        let mut generate = ImageGeneratePanel::default();
        let mut search = SearchPanel::default();
        search.search(&DryrunGateway, "weather");

        assert_eq!(generate.generate(&failing, "a cat"), PanelRun::Failed);
        assert_eq!(generate.state().error(), Some("the model returned no image"));
        assert!(generate.state().result().is_none());
        assert!(search.state().result().is_some());
        assert!(search.state().error().is_none());
        Ok(())
    }

    #[test]
    fn success_clears_previous_error() {
        let mut panel = SpeechPanel::default();
        panel.speak(&FailingGateway::new(GatewayError::CredentialUnavailable), "hi");
        assert!(panel.state().error().is_some());
        assert_eq!(panel.speak(&DryrunGateway, "hi"), PanelRun::Succeeded);
        assert!(panel.state().error().is_none());
    }

    #[test]
    fn analyze_and_animate_use_source() -> anyhow::Result<()> {
        let gateway = DryrunGateway;
        let image = gateway.generate_image("scene")?;

        let mut analyze = ImageAnalyzePanel::default();
        analyze.set_source(image.clone());
        assert_eq!(analyze.analyze(&gateway, "describe"), PanelRun::Succeeded);
        assert!(analyze.state().result().is_some_and(|text| text.contains("describe")));

        let mut animator = VideoAnimatorPanel::default();
        assert_eq!(animator.animate(&gateway, "pan"), PanelRun::Skipped);
        animator.set_source(image);
        animator.set_aspect_ratio(AspectRatio::Portrait);
        assert_eq!(animator.animate(&gateway, "pan"), PanelRun::Succeeded);
        let clip = animator.state().result().expect("clip");
        assert!(clip.reference.uri.starts_with("dryrun://video/"));
        assert!(!clip.bytes.is_empty());
        Ok(())
    }

    #[test]
    fn animation_without_video_reports_error() -> anyhow::Result<()> {
        let mut animator = VideoAnimatorPanel::default();
        animator.set_source(DryrunGateway.generate_image("x")?);
        let failing = FailingGateway::new(GatewayError::NoVideoProduced);
        assert_eq!(animator.animate(&failing, "move"), PanelRun::Failed);
        assert_eq!(
            animator.state().error(),
            Some("video generation finished without a video")
        );
        Ok(())
    }

    #[test]
    fn gold_price_is_parsed_from_search_answer() {
        let mut panel = GoldPricePanel::default();
        assert_eq!(panel.refresh(&DryrunGateway), PanelRun::Succeeded);
        let snapshot = panel.state().result().expect("snapshot");
        assert!(snapshot.price_per_gram_usd > 0.0);
    }

    #[test]
    fn unparseable_gold_answer_is_an_error() {
        let gateway = FailingGateway {
            error: GatewayError::transport("unused"),
            search_answer: Some("Gold is doing fine today.".to_string()),
        };
        let mut panel = GoldPricePanel::default();
        assert_eq!(panel.refresh(&gateway), PanelRun::Failed);
        assert!(panel
            .state()
            .error()
            .is_some_and(|message| message.contains("gold prices")));
    }
}
