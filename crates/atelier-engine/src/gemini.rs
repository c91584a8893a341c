use std::env;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Duration;

use atelier_contracts::chat::{ChatTurn, Role};
use atelier_contracts::error::{GatewayError, GatewayResult};
use atelier_contracts::media::ImagePayload;
use atelier_contracts::models::{Capability, ModelRegistry};
use atelier_contracts::search::{citations_from_grounding, SearchResult};
use atelier_contracts::speech::SpeechAudio;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};

use crate::animation::{
    AnimationJob, OperationPoller, OperationSnapshot, Sleeper, ThreadSleeper,
    ANIMATION_POLL_INTERVAL,
};
use crate::credentials::Credentials;
use crate::chat::EMPTY_REPLY;
use crate::gateway::{AspectRatio, ChatHandle, FragmentStream, Gateway, VideoReference};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_VOICE: &str = "Kore";
const ENTITY_NOT_FOUND: &str = "Requested entity was not found";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub api_base: String,
    pub image_model: String,
    pub vision_model: String,
    pub search_model: String,
    pub video_model: String,
    pub speech_model: String,
    pub voice: String,
    pub poll_interval: Duration,
}

impl GatewayConfig {
    /// Provider defaults with one model per operation taken from `registry`.
    pub fn new(registry: &ModelRegistry) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            image_model: default_model(registry, Capability::Edit, "gemini-2.5-flash-image"),
            vision_model: default_model(registry, Capability::Vision, "gemini-2.5-flash"),
            search_model: default_model(registry, Capability::Search, "gemini-2.5-flash"),
            video_model: default_model(registry, Capability::Video, "veo-2.0-generate-001"),
            speech_model: default_model(
                registry,
                Capability::Speech,
                "gemini-2.5-flash-preview-tts",
            ),
            voice: DEFAULT_VOICE.to_string(),
            poll_interval: ANIMATION_POLL_INTERVAL,
        }
    }

    /// Applies `GEMINI_API_BASE` and `ATELIER_VOICE` on top of [`GatewayConfig::new`].
    pub fn from_env(registry: &ModelRegistry) -> Self {
        let mut config = Self::new(registry);
        if let Some(api_base) = non_empty_env("GEMINI_API_BASE") {
            config.api_base = api_base.trim_end_matches('/').to_string();
        }
        if let Some(voice) = non_empty_env("ATELIER_VOICE") {
            config.voice = voice;
        }
        config
    }
}

fn default_model(registry: &ModelRegistry, capability: Capability, fallback: &str) -> String {
    registry
        .default_for(capability)
        .map(|model| model.name.clone())
        .unwrap_or_else(|| fallback.to_string())
}

/// Gateway backed by the Gemini REST API (`generateContent`,
/// `streamGenerateContent`, `predictLongRunning`).
#[derive(Clone)]
pub struct GeminiGateway {
    inner: Arc<GeminiInner>,
}

struct GeminiInner {
    config: GatewayConfig,
    http: HttpClient,
    credentials: Credentials,
    sleeper: Box<dyn Sleeper>,
}

impl GeminiGateway {
    pub fn new(config: GatewayConfig, credentials: Credentials) -> anyhow::Result<Self> {
        Self::with_sleeper(config, credentials, ThreadSleeper)
    }

    pub fn with_sleeper(
        config: GatewayConfig,
        credentials: Credentials,
        sleeper: impl Sleeper + 'static,
    ) -> anyhow::Result<Self> {
        // Streams and long polls run as long as the provider keeps them open.
        let http = HttpClient::builder()
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self {
            inner: Arc::new(GeminiInner {
                config,
                http,
                credentials,
                sleeper: Box::new(sleeper),
            }),
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.inner.config
    }

    pub fn credentials(&self) -> &Credentials {
        &self.inner.credentials
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{}", self.inner.config.api_base, model_path, method)
    }

    fn post_json(&self, label: &str, url: &str, api_key: &str, payload: &Value) -> GatewayResult<Value> {
        let response = self
            .inner
            .http
            .post(url)
            .query(&[("key", api_key)])
            .json(payload)
            .send()
            .map_err(|err| request_failed(label, err))?;
        response_json_or_error(label, response)
    }

    fn generate_content(&self, label: &str, model: &str, payload: &Value) -> GatewayResult<Value> {
        let api_key = self.inner.credentials.acquire()?;
        let url = self.model_url(model, "generateContent");
        self.post_json(label, &url, &api_key, payload)
    }

    /// Turns the provider's "entity not found" into `CredentialInvalidated`
    /// and drops the cached key so the next attempt re-selects one.
    fn screen_entity_error(&self, err: GatewayError) -> GatewayError {
        if is_entity_not_found(&err) {
            self.inner.credentials.invalidate();
            return GatewayError::CredentialInvalidated;
        }
        err
    }
}

impl OperationPoller for GeminiGateway {
    fn poll_operation(&self, name: &str) -> GatewayResult<OperationSnapshot> {
        let api_key = self.inner.credentials.acquire()?;
        let url = format!("{}/{}", self.inner.config.api_base, name.trim_start_matches('/'));
        let response = self
            .inner
            .http
            .get(&url)
            .query(&[("key", api_key.as_str())])
            .send()
            .map_err(|err| request_failed("Veo poll", err))
            .map_err(|err| self.screen_entity_error(err))?;
        let payload = response_json_or_error("Veo poll", response)
            .map_err(|err| self.screen_entity_error(err))?;
        operation_snapshot(&payload).map_err(|err| self.screen_entity_error(err))
    }
}

impl Gateway for GeminiGateway {
    fn name(&self) -> &str {
        "gemini"
    }

    fn edit_image(&self, image: &ImagePayload, instruction: &str) -> GatewayResult<ImagePayload> {
        let payload = image_request(Some(image), instruction);
        let response =
            self.generate_content("Gemini image edit", &self.inner.config.image_model, &payload)?;
        extract_image(&response)
    }

    fn generate_image(&self, instruction: &str) -> GatewayResult<ImagePayload> {
        let payload = image_request(None, instruction);
        let response =
            self.generate_content("Gemini image", &self.inner.config.image_model, &payload)?;
        extract_image(&response)
    }

    fn analyze_image(&self, image: &ImagePayload, instruction: &str) -> GatewayResult<String> {
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [inline_image_part(image), { "text": instruction }],
            }],
        });
        let response =
            self.generate_content("Gemini vision", &self.inner.config.vision_model, &payload)?;
        Ok(response_text(&response))
    }

    fn web_search(&self, query: &str) -> GatewayResult<SearchResult> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": [{ "text": query }] }],
            "tools": [{ "google_search": {} }],
        });
        let response =
            self.generate_content("Gemini search", &self.inner.config.search_model, &payload)?;
        Ok(search_result(&response))
    }

    fn animate_image(
        &self,
        image: &ImagePayload,
        instruction: &str,
        aspect_ratio: AspectRatio,
    ) -> GatewayResult<VideoReference> {
        let api_key = self.inner.credentials.acquire()?;
        let url = self.model_url(&self.inner.config.video_model, "predictLongRunning");
        let payload = animation_request(image, instruction, aspect_ratio);
        let submitted = self
            .post_json("Veo", &url, &api_key, &payload)
            .map_err(|err| self.screen_entity_error(err))?;
        let snapshot =
            operation_snapshot(&submitted).map_err(|err| self.screen_entity_error(err))?;

        let mut job = AnimationJob::new(snapshot, self.inner.config.poll_interval);
        let outcome = job.run(self, self.inner.sleeper.as_ref())?;
        Ok(outcome.video)
    }

    fn download_video(&self, video: &VideoReference) -> GatewayResult<Vec<u8>> {
        let api_key = self.inner.credentials.acquire()?;
        let response = self
            .inner
            .http
            .get(&video.uri)
            .query(&[("key", api_key.as_str())])
            .send()
            .map_err(|err| request_failed("Veo download", err))?;
        let response = ensure_success("Veo download", response)
            .map_err(|err| self.screen_entity_error(err))?;
        response
            .bytes()
            .map(|bytes| bytes.to_vec())
            .map_err(|err| request_failed("Veo download", err))
    }

    fn text_to_speech(&self, text: &str) -> GatewayResult<SpeechAudio> {
        let payload = json!({
            "contents": [{ "role": "user", "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": {
                        "prebuiltVoiceConfig": { "voiceName": self.inner.config.voice },
                    },
                },
            },
        });
        let response =
            self.generate_content("Gemini speech", &self.inner.config.speech_model, &payload)?;
        inline_parts(&response)
            .into_iter()
            .next()
            .map(|(data, _)| SpeechAudio::from_base64(data))
            .ok_or_else(|| GatewayError::transport("Gemini speech response contained no audio"))
    }

    fn open_chat(&self, model: &str, prior_turns: &[ChatTurn]) -> GatewayResult<Box<dyn ChatHandle>> {
        self.inner.credentials.acquire()?;
        Ok(Box::new(GeminiChat {
            gateway: self.clone(),
            model: model.to_string(),
            history: prior_turns.to_vec(),
        }))
    }
}

struct GeminiChat {
    gateway: GeminiGateway,
    model: String,
    history: Vec<ChatTurn>,
}

impl ChatHandle for GeminiChat {
    fn model(&self) -> &str {
        &self.model
    }

    fn send<'a>(&'a mut self, text: &str) -> GatewayResult<FragmentStream<'a>> {
        let api_key = self.gateway.inner.credentials.acquire()?;
        let url = self.gateway.model_url(&self.model, "streamGenerateContent");
        let mut contents = contents_from_turns(&self.history);
        contents.push(json!({ "role": Role::User.as_wire(), "parts": [{ "text": text }] }));

        let response = self
            .gateway
            .inner
            .http
            .post(&url)
            .query(&[("alt", "sse"), ("key", api_key.as_str())])
            .json(&json!({ "contents": contents }))
            .send()
            .map_err(|err| request_failed("Gemini chat", err))?;
        let response = ensure_success("Gemini chat", response)?;
        Ok(Box::new(SseFragments::new(
            BufReader::new(response),
            &mut self.history,
            text,
        )))
    }
}

/// Reads `data:` lines of a server-sent-event reply and yields the text of
/// each chunk. The exchange is recorded in `history` only at a clean end of
/// stream.
struct SseFragments<'a, R> {
    reader: R,
    history: &'a mut Vec<ChatTurn>,
    user_text: String,
    reply: String,
    finished: bool,
}

impl<'a, R: BufRead> SseFragments<'a, R> {
    fn new(reader: R, history: &'a mut Vec<ChatTurn>, user_text: &str) -> Self {
        Self {
            reader,
            history,
            user_text: user_text.to_string(),
            reply: String::new(),
            finished: false,
        }
    }

    fn fail(&mut self, message: String) -> Option<GatewayResult<String>> {
        self.finished = true;
        Some(Err(GatewayError::transport(message)))
    }
}

impl<R: BufRead> Iterator for SseFragments<'_, R> {
    type Item = GatewayResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => {
                    if self.reply.is_empty() {
                        return self.fail(EMPTY_REPLY.to_string());
                    }
                    self.finished = true;
                    self.history.push(ChatTurn::user(std::mem::take(&mut self.user_text)));
                    self.history
                        .push(ChatTurn::assistant(std::mem::take(&mut self.reply)));
                    return None;
                }
                Ok(_) => {}
                Err(err) => return self.fail(format!("Gemini chat stream read failed: {err}")),
            }

            let Some(data) = line.trim().strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }
            let chunk: Value = match serde_json::from_str(data) {
                Ok(value) => value,
                Err(err) => return self.fail(format!("Gemini chat returned invalid JSON: {err}")),
            };
            if let Some(message) = provider_error_message(&chunk) {
                return self.fail(format!("Gemini chat stream error: {message}"));
            }
            let text = response_text(&chunk);
            if text.is_empty() {
                continue;
            }
            self.reply.push_str(&text);
            return Some(Ok(text));
        }
    }
}

fn contents_from_turns(turns: &[ChatTurn]) -> Vec<Value> {
    turns
        .iter()
        .map(|turn| {
            json!({
                "role": turn.role.as_wire(),
                "parts": [{ "text": turn.content }],
            })
        })
        .collect()
}

fn inline_image_part(image: &ImagePayload) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime().as_str(),
            "data": image.to_base64(),
        }
    })
}

fn image_request(image: Option<&ImagePayload>, instruction: &str) -> Value {
    let mut parts = Vec::new();
    if let Some(image) = image {
        parts.push(inline_image_part(image));
    }
    parts.push(json!({ "text": instruction }));
    json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": { "responseModalities": ["IMAGE", "TEXT"] },
    })
}

fn animation_request(image: &ImagePayload, instruction: &str, aspect_ratio: AspectRatio) -> Value {
    json!({
        "instances": [{
            "prompt": instruction,
            "image": {
                "bytesBase64Encoded": image.to_base64(),
                "mimeType": image.mime().as_str(),
            },
        }],
        "parameters": {
            "aspectRatio": aspect_ratio.as_str(),
            "sampleCount": 1,
        },
    })
}

fn candidate_parts(response: &Value) -> Vec<&Value> {
    response
        .get("candidates")
        .and_then(Value::as_array)
        .map(|candidates| {
            candidates
                .iter()
                .filter_map(|candidate| {
                    candidate
                        .get("content")
                        .and_then(|content| content.get("parts"))
                        .and_then(Value::as_array)
                })
                .flatten()
                .collect()
        })
        .unwrap_or_default()
}

/// Concatenated text parts of the first candidate, skipping thought parts.
fn response_text(response: &Value) -> String {
    let Some(parts) = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
    else {
        return String::new();
    };
    parts
        .iter()
        .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect()
}

/// `(base64 data, mime type)` of every inline data part, in order.
fn inline_parts(response: &Value) -> Vec<(String, Option<String>)> {
    candidate_parts(response)
        .into_iter()
        .filter_map(|part| {
            let inline = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))?;
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .filter(|value| !value.is_empty())?;
            let mime = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Some((data.to_string(), mime))
        })
        .collect()
}

fn extract_image(response: &Value) -> GatewayResult<ImagePayload> {
    let (data, mime) = inline_parts(response)
        .into_iter()
        .find(|(_, mime)| {
            mime.as_deref()
                .map(|value| value.starts_with("image/"))
                .unwrap_or(true)
        })
        .ok_or(GatewayError::NoImageProduced)?;
    ImagePayload::from_base64(&data, mime.as_deref())
}

fn search_result(response: &Value) -> SearchResult {
    let citations = response
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate.get("groundingMetadata"))
        .map(citations_from_grounding)
        .unwrap_or_default();
    SearchResult {
        text: response_text(response),
        citations,
    }
}

fn operation_snapshot(payload: &Value) -> GatewayResult<OperationSnapshot> {
    if let Some(message) = provider_error_message(payload) {
        return Err(GatewayError::transport(format!("Veo operation failed: {message}")));
    }
    let name = payload
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let done = payload.get("done").and_then(Value::as_bool).unwrap_or(false);
    if !done {
        return Ok(OperationSnapshot::pending(name));
    }
    let response = payload.get("response");
    let samples = response
        .and_then(|value| value.get("generateVideoResponse"))
        .and_then(|value| value.get("generatedSamples"))
        .or_else(|| response.and_then(|value| value.get("generatedVideos")))
        .and_then(Value::as_array);
    let video = samples
        .and_then(|rows| rows.first())
        .and_then(|sample| sample.get("video"))
        .and_then(|video| video.get("uri"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
        .map(|uri| VideoReference {
            uri: uri.to_string(),
        });
    Ok(OperationSnapshot::finished(name, video))
}

fn provider_error_message(payload: &Value) -> Option<String> {
    let error = payload.get("error")?;
    if let Some(message) = error
        .get("message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return Some(message.to_string());
    }
    if error.is_null() {
        return None;
    }
    Some(truncate_text(&error.to_string(), 512))
}

fn is_entity_not_found(err: &GatewayError) -> bool {
    matches!(err, GatewayError::TransportFailure(message) if message.contains(ENTITY_NOT_FOUND))
}

fn request_failed(label: &str, err: reqwest::Error) -> GatewayError {
    // The key travels in the query string; keep it out of messages.
    GatewayError::transport(format!("{label} request failed: {}", err.without_url()))
}

fn ensure_success(label: &str, response: HttpResponse) -> GatewayResult<HttpResponse> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(status_error(label, status.as_u16(), &body))
}

fn status_error(label: &str, code: u16, body: &str) -> GatewayError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|payload| provider_error_message(&payload))
        .unwrap_or_else(|| truncate_text(body, 512));
    GatewayError::transport(format!("{label} request failed ({code}): {detail}"))
}

fn response_json_or_error(label: &str, response: HttpResponse) -> GatewayResult<Value> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| GatewayError::transport(format!("{label} response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(status_error(label, status.as_u16(), &body));
    }
    serde_json::from_str(&body)
        .map_err(|_| GatewayError::transport(format!("{label} returned invalid JSON payload")))
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use atelier_contracts::chat::ChatTurn;
    use atelier_contracts::error::GatewayError;
    use atelier_contracts::media::{ImageMime, ImagePayload};
    use atelier_contracts::models::ModelRegistry;
    use serde_json::json;

    use super::{
        animation_request, extract_image, image_request, operation_snapshot, response_text,
        search_result, status_error, GatewayConfig, GeminiGateway, SseFragments,
    };
    use crate::credentials::{Credentials, StaticCredentialHost};
    use crate::gateway::{AspectRatio, Gateway, VideoReference};

    fn gateway_without_key() -> GeminiGateway {
        GeminiGateway::new(
            GatewayConfig::new(&ModelRegistry::default()),
            Credentials::new(StaticCredentialHost::new(None)),
        )
        .unwrap()
    }

    #[test]
    fn config_defaults_come_from_registry() {
        let config = GatewayConfig::new(&ModelRegistry::default());
        assert_eq!(config.api_base, "https://generativelanguage.googleapis.com/v1beta");
        assert_eq!(config.image_model, "gemini-2.5-flash-image");
        assert_eq!(config.video_model, "veo-2.0-generate-001");
        assert_eq!(config.speech_model, "gemini-2.5-flash-preview-tts");
        assert_eq!(config.poll_interval.as_secs(), 5);
    }

    #[test]
    fn operations_fail_before_network_without_credential() {
        let gateway = gateway_without_key();
        let image = ImagePayload::new(vec![1, 2, 3], ImageMime::Png);
        assert_eq!(
            gateway.generate_image("a fox").unwrap_err(),
            GatewayError::CredentialUnavailable
        );
        assert_eq!(
            gateway.web_search("news").unwrap_err(),
            GatewayError::CredentialUnavailable
        );
        assert_eq!(
            gateway
                .animate_image(&image, "wave", AspectRatio::Portrait)
                .unwrap_err(),
            GatewayError::CredentialUnavailable
        );
        assert!(matches!(
            gateway.open_chat("gemini-2.5-flash", &[]),
            Err(GatewayError::CredentialUnavailable)
        ));
    }

    #[test]
    fn entity_not_found_invalidates_credential() {
        let gateway = GeminiGateway::new(
            GatewayConfig::new(&ModelRegistry::default()),
            Credentials::new(StaticCredentialHost::new(Some("k".to_string()))),
        )
        .unwrap();
        gateway.credentials().acquire().unwrap();

        let raw = status_error(
            "Veo",
            404,
            r#"{"error": {"code": 404, "message": "Requested entity was not found.", "status": "NOT_FOUND"}}"#,
        );
        assert_eq!(gateway.screen_entity_error(raw), GatewayError::CredentialInvalidated);
        assert!(!gateway.credentials().is_provisioned());

        let other = GatewayError::transport("boom");
        assert_eq!(gateway.screen_entity_error(other.clone()), other);
    }

    #[test]
    fn image_request_puts_image_before_instruction() {
        let image = ImagePayload::new(vec![0xff], ImageMime::Jpeg);
        let payload = image_request(Some(&image), "make it blue");
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[0]["inlineData"]["data"], json!("/w=="));
        assert_eq!(parts[1]["text"], json!("make it blue"));
        assert_eq!(
            payload["generationConfig"]["responseModalities"],
            json!(["IMAGE", "TEXT"])
        );
    }

    #[test]
    fn animation_request_carries_aspect_ratio() {
        let image = ImagePayload::new(vec![1], ImageMime::Png);
        let payload = animation_request(&image, "pan left", AspectRatio::Portrait);
        assert_eq!(payload["parameters"]["aspectRatio"], json!("9:16"));
        assert_eq!(payload["instances"][0]["prompt"], json!("pan left"));
        assert_eq!(payload["instances"][0]["image"]["mimeType"], json!("image/png"));
    }

    #[test]
    fn extract_image_skips_text_parts() -> anyhow::Result<()> {
        let response = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here is your image"},
                    {"inlineData": {"mimeType": "image/png", "data": "AQID"}}
                ]}
            }]
        });
        let image = extract_image(&response)?;
        assert_eq!(image.bytes(), &[1, 2, 3]);
        assert_eq!(image.mime(), ImageMime::Png);
        Ok(())
    }

    #[test]
    fn text_only_response_is_no_image_produced() {
        let response = json!({"candidates": [{"content": {"parts": [{"text": "I can't"}]}}]});
        assert_eq!(extract_image(&response).unwrap_err(), GatewayError::NoImageProduced);
        assert_eq!(extract_image(&json!({})).unwrap_err(), GatewayError::NoImageProduced);
    }

    #[test]
    fn response_text_skips_thoughts() {
        let response = json!({"candidates": [{"content": {"parts": [
            {"text": "thinking...", "thought": true},
            {"text": "A cat "},
            {"text": "on a mat."}
        ]}}]});
        assert_eq!(response_text(&response), "A cat on a mat.");
    }

    #[test]
    fn search_result_filters_citations() {
        let response = json!({"candidates": [{
            "content": {"parts": [{"text": "Answer."}]},
            "groundingMetadata": {"groundingChunks": [
                {"web": {"uri": "a", "title": ""}},
                {"web": {"uri": "b", "title": "T"}}
            ]}
        }]});
        let result = search_result(&response);
        assert_eq!(result.text, "Answer.");
        assert_eq!(result.citations.len(), 1);
        assert_eq!(result.citations[0].uri, "b");
    }

    #[test]
    fn operation_snapshot_variants() {
        let pending = operation_snapshot(&json!({"name": "models/veo/operations/1"})).unwrap();
        assert!(!pending.done);
        assert_eq!(pending.name, "models/veo/operations/1");

        let done = operation_snapshot(&json!({
            "name": "op",
            "done": true,
            "response": {"generateVideoResponse": {"generatedSamples": [
                {"video": {"uri": "https://files/v.mp4?alt=media"}}
            ]}}
        }))
        .unwrap();
        assert_eq!(
            done.video,
            Some(VideoReference {
                uri: "https://files/v.mp4?alt=media".to_string()
            })
        );

        let empty = operation_snapshot(&json!({"name": "op", "done": true, "response": {}})).unwrap();
        assert!(empty.done);
        assert!(empty.video.is_none());

        let failed = operation_snapshot(&json!({
            "done": true,
            "error": {"code": 5, "message": "Requested entity was not found."}
        }))
        .unwrap_err();
        assert!(matches!(failed, GatewayError::TransportFailure(message) if message.contains("not found")));
    }

    #[test]
    fn sse_fragments_stream_in_order_and_record_history() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"Hel\"}]}}]}\r\n\r\n",
            "data: {\"candidates\":[{\"content\":{\"role\":\"model\",\"parts\":[{\"text\":\"lo\"}]}}]}\r\n\r\n",
            ": keep-alive\n\n",
            "data: {\"candidates\":[{\"finishReason\":\"STOP\"}],\"usageMetadata\":{}}\n\n",
        );
        let mut history = vec![ChatTurn::user("earlier"), ChatTurn::assistant("reply")];
        let fragments: Vec<String> = SseFragments::new(Cursor::new(body), &mut history, "hi")
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(fragments, vec!["Hel", "lo"]);
        assert_eq!(history.len(), 4);
        assert_eq!(history[2], ChatTurn::user("hi"));
        assert_eq!(history[3], ChatTurn::assistant("Hello"));
    }

    #[test]
    fn sse_stream_without_text_is_an_error() {
        let body = "data: {\"candidates\":[{\"finishReason\":\"SAFETY\"}]}\n\n";
        let mut history = vec![ChatTurn::user("earlier"), ChatTurn::assistant("reply")];
        let mut stream = SseFragments::new(Cursor::new(body), &mut history, "hi");

        assert!(matches!(
            stream.next(),
            Some(Err(GatewayError::TransportFailure(message))) if message.contains("empty reply")
        ));
        assert_eq!(stream.next(), None);
        drop(stream);
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn sse_error_chunk_fails_without_touching_history() {
        let body = concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"par\"}]}}]}\n\n",
            "data: {\"error\":{\"code\":503,\"message\":\"overloaded\"}}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"never\"}]}}]}\n\n",
        );
        let mut history = Vec::new();
        let mut stream = SseFragments::new(Cursor::new(body), &mut history, "hi");

        assert_eq!(stream.next(), Some(Ok("par".to_string())));
        assert!(matches!(stream.next(), Some(Err(GatewayError::TransportFailure(m))) if m.contains("overloaded")));
        assert_eq!(stream.next(), None);
        drop(stream);
        assert!(history.is_empty());
    }
}
