use std::collections::VecDeque;
use std::f32::consts::PI;
use std::io::Cursor;

use atelier_contracts::chat::ChatTurn;
use atelier_contracts::error::{GatewayError, GatewayResult};
use atelier_contracts::media::{ImageMime, ImagePayload};
use atelier_contracts::search::{Citation, SearchResult};
use atelier_contracts::speech::{SpeechAudio, SPEECH_SAMPLE_RATE};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use sha2::{Digest, Sha256};

use crate::gateway::{AspectRatio, ChatHandle, FragmentStream, Gateway, VideoReference};

const DRYRUN_IMAGE_SIZE: u32 = 256;
const DRYRUN_TONE_HZ: f32 = 440.0;

/// Offline gateway with deterministic output, for demos and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryrunGateway;

impl Gateway for DryrunGateway {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn edit_image(&self, image: &ImagePayload, instruction: &str) -> GatewayResult<ImagePayload> {
        let (width, height) = image::load_from_memory(image.bytes())
            .map(|decoded| (decoded.width(), decoded.height()))
            .unwrap_or((DRYRUN_IMAGE_SIZE, DRYRUN_IMAGE_SIZE));
        let seed = digest_parts(&[image.bytes(), instruction.as_bytes()]);
        solid_png(width, height, (seed[0], seed[1], seed[2]))
    }

    fn generate_image(&self, instruction: &str) -> GatewayResult<ImagePayload> {
        let seed = digest_parts(&[instruction.as_bytes()]);
        solid_png(DRYRUN_IMAGE_SIZE, DRYRUN_IMAGE_SIZE, (seed[0], seed[1], seed[2]))
    }

    fn analyze_image(&self, image: &ImagePayload, instruction: &str) -> GatewayResult<String> {
        let dims = image::load_from_memory(image.bytes())
            .map(|decoded| format!("{}x{}", decoded.width(), decoded.height()))
            .unwrap_or_else(|_| format!("{} byte", image.len()));
        Ok(format!(
            "Dry-run analysis of a {dims} {} image. Instruction: {}",
            image.mime().as_str(),
            instruction.trim()
        ))
    }

    fn web_search(&self, query: &str) -> GatewayResult<SearchResult> {
        let id = short_id(query);
        let mut text = format!("Dry-run results for \"{}\".", query.trim());
        if query.to_ascii_lowercase().contains("gold") {
            text.push_str(
                "\n{\"pricePerOunce\": 2400.00, \"pricePerGram\": 77.16, \"lastUpdated\": \"dry run\"}",
            );
        }
        Ok(SearchResult {
            text,
            citations: vec![Citation {
                uri: format!("dryrun://search/{id}"),
                title: format!("Dry-run source {id}"),
            }],
        })
    }

    fn animate_image(
        &self,
        image: &ImagePayload,
        instruction: &str,
        aspect_ratio: AspectRatio,
    ) -> GatewayResult<VideoReference> {
        let seed = digest_parts(&[
            image.bytes(),
            instruction.as_bytes(),
            aspect_ratio.as_str().as_bytes(),
        ]);
        Ok(VideoReference {
            uri: format!("dryrun://video/{}", hex::encode(&seed[..4])),
        })
    }

    fn download_video(&self, video: &VideoReference) -> GatewayResult<Vec<u8>> {
        if !video.uri.starts_with("dryrun://video/") {
            return Err(GatewayError::transport(format!(
                "dryrun cannot download {}",
                video.uri
            )));
        }
        Ok(format!("DRYRUN VIDEO {}\n", video.uri).into_bytes())
    }

    fn text_to_speech(&self, text: &str) -> GatewayResult<SpeechAudio> {
        let words = text.split_whitespace().count().max(2);
        let count = (SPEECH_SAMPLE_RATE as usize / 4) * words;
        let samples: Vec<i16> = (0..count)
            .map(|idx| {
                let t = idx as f32 / SPEECH_SAMPLE_RATE as f32;
                ((2.0 * PI * DRYRUN_TONE_HZ * t).sin() * 0.25 * i16::MAX as f32) as i16
            })
            .collect();
        Ok(SpeechAudio::from_samples(&samples))
    }

    fn open_chat(&self, model: &str, prior_turns: &[ChatTurn]) -> GatewayResult<Box<dyn ChatHandle>> {
        Ok(Box::new(DryrunChat {
            model: model.to_string(),
            history: prior_turns.to_vec(),
        }))
    }
}

struct DryrunChat {
    model: String,
    history: Vec<ChatTurn>,
}

impl ChatHandle for DryrunChat {
    fn model(&self) -> &str {
        &self.model
    }

    fn send<'a>(&'a mut self, text: &str) -> GatewayResult<FragmentStream<'a>> {
        let reply = format!("[{}] You said: {}", self.model, text.trim());
        Ok(Box::new(EchoFragments {
            pending: split_words(&reply),
            history: &mut self.history,
            user_text: text.to_string(),
            reply,
            finished: false,
        }))
    }
}

struct EchoFragments<'a> {
    pending: VecDeque<String>,
    history: &'a mut Vec<ChatTurn>,
    user_text: String,
    reply: String,
    finished: bool,
}

impl Iterator for EchoFragments<'_> {
    type Item = GatewayResult<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(fragment) = self.pending.pop_front() {
            return Some(Ok(fragment));
        }
        if !self.finished {
            self.finished = true;
            self.history
                .push(ChatTurn::user(std::mem::take(&mut self.user_text)));
            self.history
                .push(ChatTurn::assistant(std::mem::take(&mut self.reply)));
        }
        None
    }
}

/// Splits after each run of whitespace so the pieces concatenate back to `text`.
fn split_words(text: &str) -> VecDeque<String> {
    let mut out = VecDeque::new();
    let mut current = String::new();
    let mut in_space = false;
    for ch in text.chars() {
        if in_space && !ch.is_whitespace() {
            out.push_back(std::mem::take(&mut current));
        }
        in_space = ch.is_whitespace();
        current.push(ch);
    }
    if !current.is_empty() {
        out.push_back(current);
    }
    out
}

fn solid_png(width: u32, height: u32, (r, g, b): (u8, u8, u8)) -> GatewayResult<ImagePayload> {
    let mut image = RgbImage::new(width.max(1), height.max(1));
    for pixel in image.pixels_mut() {
        *pixel = Rgb([r, g, b]);
    }
    let mut bytes = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(image)
        .write_to(&mut bytes, ImageFormat::Png)
        .map_err(|err| GatewayError::transport(format!("dryrun image encode failed: {err}")))?;
    Ok(ImagePayload::new(bytes.into_inner(), ImageMime::Png))
}

fn digest_parts(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

fn short_id(text: &str) -> String {
    hex::encode(&digest_parts(&[text.as_bytes()])[..4])
}
