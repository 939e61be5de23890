//! Shared collaborator data types.

use serde::{Deserialize, Serialize};

/// Result of transcribing one human utterance.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    pub text: String,
}

/// Per-character timing metadata some TTS providers attach to audio chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterAlignment {
    pub chars: Vec<String>,
    #[serde(rename = "charStartTimesMs")]
    pub char_start_times_ms: Vec<u32>,
    #[serde(rename = "charDurationsMs")]
    pub char_durations_ms: Vec<u32>,
}

/// One chunk of synthesized agent audio.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub audio: Vec<u8>,
    pub alignment: Option<CharacterAlignment>,
}

/// End-of-turn measurements, reported to the client after the agent has
/// finished (or abandoned) a response. Durations are in seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnSummary {
    pub stt_duration: f64,
    pub llm_duration: f64,
    pub tts_duration: f64,
    pub total_duration: f64,
    /// Time from turn start until the first audio chunk left the TTS.
    pub first_chunk_time: f64,
    pub transcript: String,
    pub response: String,
}
