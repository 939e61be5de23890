//! Turn-taking classification.

use crate::error::ConvoError;
use crate::vad::SpeechSegment;

/// Where the conversation stands after the latest VAD tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    HumanSilent,
    BothSpeaking,
    HumanStartedSpeaking,
    /// Back-channel while the agent was speaking; restream, don't transcribe.
    ShortInterruption,
    /// Real barge-in; the agent's turn is over.
    LongInterruption,
    ShortSpeech,
    LongSpeech,
}

/// Classify the latest gate output against the ledger's two predicates.
///
/// Pure: callers slice the human utterance out of the buffer before asking,
/// so the predicates already reflect the completed segment.
pub fn classify(
    segment: Option<&SpeechSegment>,
    agent_speaking: bool,
    agent_interrupted: bool,
) -> Result<TurnState, ConvoError> {
    let Some(segment) = segment else {
        return Ok(TurnState::HumanSilent);
    };

    if !segment.ended {
        return Ok(if agent_speaking {
            TurnState::BothSpeaking
        } else {
            TurnState::HumanStartedSpeaking
        });
    }

    if agent_interrupted && segment.is_short() {
        Ok(TurnState::ShortInterruption)
    } else if agent_interrupted && segment.is_long() {
        Ok(TurnState::LongInterruption)
    } else if segment.is_short() {
        Ok(TurnState::ShortSpeech)
    } else if segment.is_long() {
        Ok(TurnState::LongSpeech)
    } else {
        Err(ConvoError::UnmatchedTurnState)
    }
}
