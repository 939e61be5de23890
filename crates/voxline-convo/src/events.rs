//! Events the orchestrator emits toward the transport.

use voxline_voice::TurnSummary;

/// Outbound conversation events, in emission order per turn:
/// `StartResponding`, then `Media`/`Mark` pairs, then `Result`. A
/// `StopSpeaking` interleaves when the human barges in, and `StartRestream`
/// precedes replayed media after a short interruption.
#[derive(Debug, Clone)]
pub enum ConversationEvent {
    /// The client must drop any buffered-but-unplayed media.
    StopSpeaking,
    /// One chunk of agent audio to play next.
    Media { audio: Vec<u8> },
    /// Token the client echoes once the preceding media has played.
    Mark { mark_id: String },
    StartResponding,
    StartRestream,
    /// End-of-turn summary with stage timings.
    Result { summary: TurnSummary },
}
