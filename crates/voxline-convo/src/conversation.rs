//! Per-conversation state shared between the ingress handler and the
//! orchestrator loop.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use voxline_core::config::AudioConfig;

use crate::error::ConvoError;
use crate::human::HumanVoiceBuffer;
use crate::ledger::{AgentSpeechChunk, AgentVoiceLedger};
use crate::turn::{classify, TurnState};
use crate::vad::SpeechSegment;

/// Bookkeeping for one spawned response task.
///
/// `invoked_with_speech` is kept so the input of a cancelled task can be
/// re-queued into the next turn's transcription.
pub struct ResponseTaskRecord {
    pub invoked_with_speech: Vec<u8>,
    pub handle: JoinHandle<()>,
    pub cancel: CancellationToken,
}

/// One conversation's exclusively-owned state: inbound buffer, outbound
/// ledger, and outstanding response tasks.
///
/// All methods are synchronous bookkeeping; callers hold the conversation
/// behind a mutex and never suspend inside these operations.
pub struct Conversation {
    id: String,
    human: HumanVoiceBuffer,
    ledger: AgentVoiceLedger,
    tasks: Vec<ResponseTaskRecord>,
}

impl Conversation {
    pub fn new(id: impl Into<String>, audio: &AudioConfig) -> Self {
        let id = id.into();
        Self {
            human: HumanVoiceBuffer::new(audio),
            ledger: AgentVoiceLedger::new(&id),
            tasks: Vec::new(),
            id,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    // --- Human voice ---

    pub fn audio_received(&mut self, pcm: &[u8]) {
        self.human.append(pcm);
    }

    pub fn ready_to_process(&self) -> bool {
        self.human.ready_to_process()
    }

    pub fn take_aligned(&mut self) -> Vec<u8> {
        self.human.take_aligned()
    }

    pub fn human_speech_ended(&mut self, segment: &SpeechSegment) {
        self.human.on_speech_ended(segment);
    }

    pub fn discard_last_speech(&mut self) {
        self.human.discard_last_speech();
    }

    /// Cancel unfinished response tasks and assemble their inputs, plus the
    /// latest utterance, into the next turn's transcription input.
    pub fn unanswered_human_speech(&mut self) -> Vec<u8> {
        let cancelled = self.cancel_unfinished_tasks();
        self.human.assemble_unanswered(&cancelled)
    }

    // --- Agent voice ---

    pub fn new_agent_speech(&mut self) {
        self.ledger.begin_speech();
    }

    pub fn agent_chunk_sent(&mut self, audio: Vec<u8>) -> String {
        self.ledger.record_chunk(audio)
    }

    pub fn agent_speech_marked(&mut self, speech_idx: usize, chunk_idx: usize) {
        self.ledger.ack_mark(speech_idx, chunk_idx);
    }

    pub fn unspoken_agent_speech(&self) -> Vec<AgentSpeechChunk> {
        self.ledger.unspoken_tail()
    }

    pub fn agent_was_interrupted(&self) -> bool {
        self.ledger.was_interrupted()
    }

    pub fn stop_speaking_agent(&mut self) {
        self.ledger.stop_current();
    }

    pub fn is_agent_speaking(&self) -> bool {
        self.ledger.is_speaking()
    }

    // --- Thinking ---

    pub fn add_response_task(&mut self, record: ResponseTaskRecord) {
        debug!(tasks = self.tasks.len() + 1, "Adding agent response task");
        self.tasks.push(record);
    }

    /// Cancel every task that has not finished and collect its input; prune
    /// the rest. Each input is collected exactly once.
    fn cancel_unfinished_tasks(&mut self) -> Vec<Vec<u8>> {
        let mut cancelled = Vec::new();
        for record in self.tasks.drain(..) {
            if !record.handle.is_finished() {
                info!("Cancelling unfinished response task, re-queueing its input");
                record.cancel.cancel();
                cancelled.push(record.invoked_with_speech);
            }
        }
        cancelled
    }

    /// Classify the current turn from the latest gate output.
    pub fn turn_state(
        &self,
        segment: Option<&SpeechSegment>,
    ) -> Result<TurnState, ConvoError> {
        classify(
            segment,
            self.ledger.is_speaking(),
            self.ledger.was_interrupted(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Conversation {
        Conversation::new("test-conv", &AudioConfig::default())
    }

    fn ended_segment(duration_ms: u32) -> SpeechSegment {
        SpeechSegment {
            start_sample: 0,
            end_sample: Some(u64::from(duration_ms) * 8),
            ended: true,
            interruption_threshold_ms: 600,
            sample_rate: 8000,
        }
    }

    fn ongoing_segment() -> SpeechSegment {
        SpeechSegment {
            start_sample: 0,
            end_sample: None,
            ended: false,
            interruption_threshold_ms: 600,
            sample_rate: 8000,
        }
    }

    #[test]
    fn silent_until_audio_is_classified() {
        let convo = conversation();
        assert_eq!(convo.turn_state(None).unwrap(), TurnState::HumanSilent);
    }

    #[test]
    fn classification_tracks_ledger_predicates() {
        let mut convo = conversation();

        // Agent silent: ongoing speech is just the human starting
        assert_eq!(
            convo.turn_state(Some(&ongoing_segment())).unwrap(),
            TurnState::HumanStartedSpeaking
        );

        // Agent with unacked chunks: overlap
        convo.new_agent_speech();
        convo.agent_chunk_sent(vec![0; 4]);
        convo.agent_chunk_sent(vec![1; 4]);
        assert_eq!(
            convo.turn_state(Some(&ongoing_segment())).unwrap(),
            TurnState::BothSpeaking
        );

        // Stop recorded: the ended short segment is a short interruption
        convo.stop_speaking_agent();
        assert_eq!(
            convo.turn_state(Some(&ended_segment(300))).unwrap(),
            TurnState::ShortInterruption
        );
        assert_eq!(
            convo.turn_state(Some(&ended_segment(900))).unwrap(),
            TurnState::LongInterruption
        );

        // A fresh speech clears the interruption
        convo.new_agent_speech();
        assert_eq!(
            convo.turn_state(Some(&ended_segment(900))).unwrap(),
            TurnState::LongSpeech
        );
    }

    #[tokio::test]
    async fn cancelling_tasks_collects_each_input_once() {
        let mut convo = conversation();
        convo.audio_received(&[4u8; 1600]);
        convo.human_speech_ended(&ended_segment(100));

        let pending = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        convo.add_response_task(ResponseTaskRecord {
            invoked_with_speech: vec![7u8; 800],
            handle: pending,
            cancel: CancellationToken::new(),
        });

        let finished = tokio::spawn(async {});
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        convo.add_response_task(ResponseTaskRecord {
            invoked_with_speech: vec![8u8; 800],
            handle: finished,
            cancel: CancellationToken::new(),
        });

        let assembled = convo.unanswered_human_speech();
        // Pending input + 160 bytes of silence + the sliced utterance
        assert_eq!(assembled.len(), 800 + 160 + 1600);
        assert_eq!(&assembled[..800], &[7u8; 800][..]);
        assert!(assembled[800..960].iter().all(|&b| b == 0));

        // The record list was drained: nothing is collected twice
        let again = convo.unanswered_human_speech();
        assert_eq!(again.len(), 1600);
    }
}
