//! Streaming text-to-speech over the ElevenLabs `stream-input` websocket.

use base64::Engine;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use voxline_core::config::TtsConfig;

use crate::domain::{AudioChunk, CharacterAlignment};

/// Synthesizes a back-pressured text stream into audio chunks.
///
/// The audio stream is finite: it ends when the text stream ends and the
/// provider has flushed its tail. Dropping the audio stream aborts synthesis.
pub trait TextToSpeech: Send + Sync {
    fn synthesize(
        &self,
        text: BoxStream<'static, String>,
    ) -> BoxStream<'static, anyhow::Result<AudioChunk>>;
}

/// ElevenLabs websocket streaming client.
pub struct ElevenLabsTts {
    config: TtsConfig,
}

impl ElevenLabsTts {
    pub fn new(config: TtsConfig) -> Self {
        Self { config }
    }
}

impl TextToSpeech for ElevenLabsTts {
    fn synthesize(
        &self,
        text: BoxStream<'static, String>,
    ) -> BoxStream<'static, anyhow::Result<AudioChunk>> {
        let (tx, rx) = mpsc::channel(32);
        let config = self.config.clone();

        tokio::spawn(async move {
            if let Err(e) = run_stream(config, text, tx.clone()).await {
                warn!(%e, "TTS stream failed");
                let _ = tx.send(Err(e)).await;
            }
        });

        ReceiverStream::new(rx).boxed()
    }
}

/// One message from the provider's websocket.
#[derive(Debug, Deserialize)]
struct ProviderFrame {
    audio: Option<String>,
    #[serde(rename = "normalizedAlignment")]
    normalized_alignment: Option<CharacterAlignment>,
    #[serde(rename = "isFinal")]
    is_final: Option<bool>,
}

async fn run_stream(
    config: TtsConfig,
    mut text: BoxStream<'static, String>,
    tx: mpsc::Sender<anyhow::Result<AudioChunk>>,
) -> anyhow::Result<()> {
    let api_key = config
        .resolve_api_key()
        .ok_or_else(|| anyhow::anyhow!("No TTS API key configured"))?;
    let voice = config.voice_id.as_deref().unwrap_or("Rachel");
    let model = config.model.as_deref().unwrap_or("eleven_turbo_v2");
    let output_format = config.output_format.as_deref().unwrap_or("ulaw_8000");
    let language = config.language.as_deref().unwrap_or("en");

    let url = format!(
        "wss://api.elevenlabs.io/v1/text-to-speech/{voice}/stream-input\
         ?model_id={model}&output_format={output_format}&language_code={language}"
    );

    debug!(voice, model, output_format, "Connecting TTS websocket");

    let (ws, _) = connect_async(url).await?;
    let (mut sink, mut source) = ws.split();

    sink.send(Message::text(
        json!({
            "text": " ",
            "voice_settings": {"stability": 0.5, "similarity_boost": 0.8},
            "xi_api_key": api_key,
        })
        .to_string(),
    ))
    .await?;

    let listener_tx = tx.clone();
    let listener = tokio::spawn(async move {
        while let Some(message) = source.next().await {
            let message = match message {
                Ok(m) => m,
                Err(e) => {
                    warn!(%e, "TTS websocket read failed");
                    let _ = listener_tx.send(Err(e.into())).await;
                    break;
                }
            };
            match message {
                Message::Text(payload) => {
                    let frame: ProviderFrame = match serde_json::from_str(payload.as_str()) {
                        Ok(f) => f,
                        Err(e) => {
                            warn!(%e, "Unparseable TTS frame");
                            continue;
                        }
                    };
                    if let Some(audio_b64) = frame.audio {
                        match base64::engine::general_purpose::STANDARD.decode(&audio_b64) {
                            Ok(audio) => {
                                let chunk = AudioChunk {
                                    audio,
                                    alignment: frame.normalized_alignment,
                                };
                                if listener_tx.send(Ok(chunk)).await.is_err() {
                                    // Consumer gone, synthesis abandoned
                                    break;
                                }
                            }
                            Err(e) => warn!(%e, "Invalid base64 audio in TTS frame"),
                        }
                    } else if frame.is_final.unwrap_or(false) {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Feed text at sentence-ish boundaries so the provider can start early.
    let mut buffer = String::new();
    while let Some(token) = text.next().await {
        if let Some(flushed) = push_token(&mut buffer, &token) {
            sink.send(Message::text(json!({"text": flushed}).to_string()))
                .await?;
        }
    }
    if !buffer.is_empty() {
        let tail = format!("{buffer} ");
        sink.send(Message::text(json!({"text": tail}).to_string()))
            .await?;
    }
    sink.send(Message::text(json!({"text": ""}).to_string()))
        .await?;

    listener.await?;
    Ok(())
}

const SPLITTERS: &[char] = &[
    '.', ',', '?', '!', ';', ':', '—', '-', '(', ')', '[', ']', '}', ' ',
];

/// Accumulate `token` into `buffer`, returning text to flush to the
/// synthesizer when a boundary is reached. Boundaries never split words.
fn push_token(buffer: &mut String, token: &str) -> Option<String> {
    if !buffer.is_empty() && buffer.ends_with(SPLITTERS) {
        let flushed = format!("{buffer} ");
        *buffer = token.to_string();
        return Some(flushed);
    }
    if let Some(first) = token.chars().next().filter(|c| SPLITTERS.contains(c)) {
        let flushed = format!("{buffer}{first} ");
        *buffer = token[first.len_utf8()..].to_string();
        return Some(flushed);
    }
    buffer.push_str(token);
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_until_boundary() {
        let mut buffer = String::new();
        assert_eq!(push_token(&mut buffer, "Hel"), None);
        assert_eq!(push_token(&mut buffer, "lo"), None);
        assert_eq!(push_token(&mut buffer, ","), Some("Hello, ".into()));
        assert_eq!(buffer, "");
    }

    #[test]
    fn flushes_after_trailing_boundary() {
        let mut buffer = String::from("Sure.");
        assert_eq!(push_token(&mut buffer, "Next"), Some("Sure. ".into()));
        assert_eq!(buffer, "Next");
    }

    #[test]
    fn plain_tokens_keep_buffering() {
        let mut buffer = String::new();
        for token in ["one", "two", "three"] {
            assert_eq!(push_token(&mut buffer, token), None);
        }
        assert_eq!(buffer, "onetwothree");
    }
}
