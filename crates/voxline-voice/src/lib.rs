//! Voice collaborators — speech-to-text, streaming language agent, and
//! streaming text-to-speech, chained into a [`VoicePipeline`].

pub mod agent;
pub mod domain;
pub mod llm;
pub mod sse;
pub mod stt;
pub mod tts;

pub use agent::{VoiceAgent, VoicePipeline, VoiceResponse};
pub use domain::{AudioChunk, CharacterAlignment, Transcript, TurnSummary};
pub use llm::{LanguageAgent, OpenAiChat};
pub use stt::{GroqStt, SpeechToText};
pub use tts::{ElevenLabsTts, TextToSpeech};
