//! Speech-to-text from raw PCM bytes.

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use voxline_core::config::{AudioConfig, SttConfig};

use crate::domain::Transcript;

/// Transcribes one utterance of linear PCM at the configured sample rate.
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, pcm: &[u8]) -> Result<Transcript>;
}

/// Wrap raw 16-bit PCM bytes in a WAV container.
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let data_len = pcm.len();
    let byte_rate = sample_rate * u32::from(channels) * u32::from(bits_per_sample) / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(44 + data_len);

    // RIFF header
    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    // fmt chunk
    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM format
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    // data chunk
    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    wav.extend_from_slice(pcm);

    wav
}

/// Whisper transcription via a Groq/OpenAI-compatible endpoint.
pub struct GroqStt {
    client: reqwest::Client,
    config: SttConfig,
    audio: AudioConfig,
}

impl GroqStt {
    pub fn new(config: SttConfig, audio: AudioConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            audio,
        }
    }

    fn endpoint(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or("https://api.groq.com/openai/v1/audio/transcriptions")
    }
}

#[async_trait]
impl SpeechToText for GroqStt {
    async fn transcribe(&self, pcm: &[u8]) -> Result<Transcript> {
        let api_key = self
            .config
            .resolve_api_key()
            .ok_or_else(|| anyhow::anyhow!("No STT API key configured"))?;

        let wav_data = pcm_to_wav(
            pcm,
            self.audio.sample_rate,
            self.audio.channels,
            (self.audio.bytes_per_sample * 8) as u16,
        );
        let model = self
            .config
            .model
            .as_deref()
            .unwrap_or("whisper-large-v3-turbo");

        debug!(model, wav_bytes = wav_data.len(), "Sending audio for transcription");

        let part = reqwest::multipart::Part::bytes(wav_data)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;

        let mut form = reqwest::multipart::Form::new()
            .text("model", model.to_string())
            .text("response_format", "text")
            .part("file", part);

        if let Some(language) = &self.config.language {
            form = form.text("language", language.clone());
        }

        let resp = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {api_key}"))
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Transcription API error {status}: {body}");
        }

        let text = resp.text().await?;
        Ok(Transcript {
            text: text.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_for_telephony_pcm() {
        let pcm = vec![0u8; 16000]; // 1 second at 8kHz, 16-bit
        let wav = pcm_to_wav(&pcm, 8000, 1, 16);

        assert_eq!(wav.len(), 44 + 16000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(&wav[36..40], b"data");

        let sr = u32::from_le_bytes([wav[24], wav[25], wav[26], wav[27]]);
        assert_eq!(sr, 8000);
        let byte_rate = u32::from_le_bytes([wav[28], wav[29], wav[30], wav[31]]);
        assert_eq!(byte_rate, 16000);
    }

    #[test]
    fn default_endpoint_is_groq() {
        let stt = GroqStt::new(SttConfig::default(), AudioConfig::default());
        assert!(stt.endpoint().contains("groq.com"));
    }
}
