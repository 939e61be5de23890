//! The STT → LLM → TTS pipeline behind one agent response.

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info, warn};

use crate::domain::{AudioChunk, TurnSummary};
use crate::llm::LanguageAgent;
use crate::stt::SpeechToText;
use crate::tts::TextToSpeech;

/// A streamed agent response.
///
/// `chunks` yields audio as the synthesizer produces it and closes when the
/// turn is over. `summary` resolves once, after the chunk channel closes.
/// Dropping `chunks` aborts the whole pipeline at its next send.
pub struct VoiceResponse {
    pub chunks: mpsc::Receiver<AudioChunk>,
    pub summary: oneshot::Receiver<TurnSummary>,
}

/// Turns one snapshot of human speech into one streamed agent utterance.
pub trait VoiceAgent: Send + Sync {
    fn respond(&self, human_speech: Vec<u8>, conversation_id: &str) -> VoiceResponse;
}

/// Production pipeline chaining the three collaborators.
pub struct VoicePipeline {
    stt: Arc<dyn SpeechToText>,
    agent: Arc<dyn LanguageAgent>,
    tts: Arc<dyn TextToSpeech>,
}

impl VoicePipeline {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        agent: Arc<dyn LanguageAgent>,
        tts: Arc<dyn TextToSpeech>,
    ) -> Self {
        Self { stt, agent, tts }
    }
}

impl VoiceAgent for VoicePipeline {
    fn respond(&self, human_speech: Vec<u8>, conversation_id: &str) -> VoiceResponse {
        let (chunk_tx, chunk_rx) = mpsc::channel(32);
        let (summary_tx, summary_rx) = oneshot::channel();

        let stt = self.stt.clone();
        let agent = self.agent.clone();
        let tts = self.tts.clone();
        let conversation_id = conversation_id.to_string();

        tokio::spawn(async move {
            let summary =
                run_turn(stt, agent, tts, human_speech, &conversation_id, chunk_tx).await;
            let _ = summary_tx.send(summary);
        });

        VoiceResponse {
            chunks: chunk_rx,
            summary: summary_rx,
        }
    }
}

async fn run_turn(
    stt: Arc<dyn SpeechToText>,
    agent: Arc<dyn LanguageAgent>,
    tts: Arc<dyn TextToSpeech>,
    human_speech: Vec<u8>,
    conversation_id: &str,
    chunk_tx: mpsc::Sender<AudioChunk>,
) -> TurnSummary {
    let turn_start = Instant::now();
    let mut summary = TurnSummary::default();

    info!(
        %conversation_id,
        speech_bytes = human_speech.len(),
        "Responding to human speech"
    );

    let transcript = match stt.transcribe(&human_speech).await {
        Ok(t) => t,
        Err(e) => {
            error!(%conversation_id, %e, "Transcription failed, abandoning turn");
            return summary;
        }
    };
    summary.stt_duration = turn_start.elapsed().as_secs_f64();
    summary.transcript = transcript.text.clone();
    info!(%conversation_id, transcript = %transcript.text, "STT result");

    // Bridge LLM tokens into a bounded channel so the synthesizer's
    // consumption rate back-pressures token forwarding.
    let llm_start = Instant::now();
    let mut tokens = agent.stream_reply(&transcript.text, conversation_id);
    let (text_tx, text_rx) = mpsc::channel::<String>(32);
    let forward = tokio::spawn(async move {
        let mut response = String::new();
        while let Some(item) = tokens.next().await {
            match item {
                Ok(token) => {
                    response.push_str(&token);
                    if text_tx.send(token).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(%e, "Language agent stream failed");
                    break;
                }
            }
        }
        (response, llm_start.elapsed().as_secs_f64())
    });

    let tts_start = Instant::now();
    let mut audio = tts.synthesize(ReceiverStream::new(text_rx).boxed());
    let mut first_chunk_at: Option<f64> = None;
    while let Some(item) = audio.next().await {
        match item {
            Ok(chunk) => {
                if first_chunk_at.is_none() {
                    first_chunk_at = Some(turn_start.elapsed().as_secs_f64());
                }
                if chunk_tx.send(chunk).await.is_err() {
                    debug!(%conversation_id, "Chunk receiver dropped, aborting turn");
                    break;
                }
            }
            Err(e) => {
                warn!(%conversation_id, %e, "TTS stream failed mid-turn");
                break;
            }
        }
    }
    drop(audio);
    summary.tts_duration = tts_start.elapsed().as_secs_f64();
    summary.first_chunk_time = first_chunk_at.unwrap_or_default();

    if let Ok((response, llm_duration)) = forward.await {
        summary.response = response;
        summary.llm_duration = llm_duration;
    }
    summary.total_duration = turn_start.elapsed().as_secs_f64();

    info!(
        %conversation_id,
        stt = summary.stt_duration,
        llm = summary.llm_duration,
        tts = summary.tts_duration,
        "Turn finished"
    );
    summary
}
