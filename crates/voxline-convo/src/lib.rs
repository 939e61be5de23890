//! The conversation core — everything between "PCM frame arrived" and
//! "audio chunk goes out".
//!
//! A [`ConversationOrchestrator`] owns one conversation: inbound audio is
//! buffered by the [`HumanVoiceBuffer`], gated through the [`VadGate`],
//! classified by the turn state machine, and answered by response tasks
//! that stream a [`voxline_voice::VoiceAgent`]'s audio back out while the
//! [`AgentVoiceLedger`] tracks what the client has actually played.

pub mod conversation;
pub mod error;
pub mod events;
pub mod human;
pub mod ledger;
pub mod orchestrator;
pub mod turn;
pub mod vad;

pub use conversation::{Conversation, ResponseTaskRecord};
pub use error::ConvoError;
pub use events::ConversationEvent;
pub use human::HumanVoiceBuffer;
pub use ledger::{AgentSpeechChunk, AgentVoiceLedger};
pub use orchestrator::ConversationOrchestrator;
pub use turn::{classify, TurnState};
pub use vad::{SileroDetector, SpeechDetector, SpeechSegment, VadGate};
