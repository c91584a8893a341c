use std::path::Path;

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{GatewayError, GatewayResult};

pub const SPEECH_SAMPLE_RATE: u32 = 24_000;
pub const SPEECH_CHANNELS: u16 = 1;

/// Synthesized speech as delivered by the provider: base64 of 16-bit
/// little-endian linear PCM, mono, 24 kHz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechAudio {
    pcm_base64: String,
}

impl SpeechAudio {
    pub fn from_base64(pcm_base64: impl Into<String>) -> Self {
        Self {
            pcm_base64: pcm_base64.into(),
        }
    }

    pub fn from_samples(samples: &[i16]) -> Self {
        let bytes: Vec<u8> = samples
            .iter()
            .flat_map(|sample| sample.to_le_bytes())
            .collect();
        Self::from_base64(BASE64.encode(bytes))
    }

    pub fn pcm_base64(&self) -> &str {
        &self.pcm_base64
    }

    pub fn samples(&self) -> GatewayResult<Vec<i16>> {
        decode_pcm16(&self.pcm_base64)
    }

    pub fn duration_seconds(&self) -> GatewayResult<f64> {
        let samples = self.samples()?;
        Ok(samples.len() as f64 / f64::from(SPEECH_SAMPLE_RATE))
    }

    pub fn write_wav(&self, path: &Path) -> anyhow::Result<usize> {
        let samples = self.samples()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let spec = hound::WavSpec {
            channels: SPEECH_CHANNELS,
            sample_rate: SPEECH_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)
            .with_context(|| format!("failed to create {}", path.display()))?;
        for sample in &samples {
            writer
                .write_sample(*sample)
                .context("failed to write wav sample")?;
        }
        writer.finalize().context("failed to finalize wav")?;
        Ok(samples.len())
    }
}

/// Decodes base64 16-bit LE PCM. A trailing odd byte is ignored.
pub fn decode_pcm16(pcm_base64: &str) -> GatewayResult<Vec<i16>> {
    let bytes = BASE64
        .decode(pcm_base64.trim().as_bytes())
        .map_err(|err| GatewayError::transport(format!("audio base64 decode failed: {err}")))?;
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}
