//! Outbound audio bookkeeping — what the agent queued, what the client
//! actually played, and where a stop landed.

use tracing::{debug, error, warn};

/// One audio chunk sent to the client, addressable by its mark id.
#[derive(Debug, Clone)]
pub struct AgentSpeechChunk {
    pub audio: Vec<u8>,
    pub mark_id: String,
}

/// One contiguous agent utterance.
#[derive(Debug, Default)]
struct AgentSpeech {
    chunks: Vec<AgentSpeechChunk>,
    /// Index of the chunk most recently acknowledged by the client.
    last_ack: usize,
    /// Chunk index at which a stop was emitted; absent if uninterrupted.
    stop_sent_at: Option<usize>,
}

impl AgentSpeech {
    fn ack(&mut self, chunk_idx: usize) {
        self.last_ack = chunk_idx.min(self.chunks.len().saturating_sub(1));
    }

    fn stop_sent(&mut self) {
        debug!(at = self.last_ack, "Stop point recorded");
        if self.stop_sent_at.is_some() {
            error!("Stop sent multiple times for the same speech");
            return;
        }
        self.stop_sent_at = Some(self.last_ack);
    }

    fn unspoken(&self) -> &[AgentSpeechChunk] {
        match self.stop_sent_at {
            Some(at) => &self.chunks[at.min(self.chunks.len())..],
            None => &self.chunks,
        }
    }

    fn was_interrupted(&self) -> bool {
        self.stop_sent_at.is_some()
    }

    /// The client only reports playback through acks, so a speech counts as
    /// over once the final chunk has been acknowledged. Treating "all chunks
    /// queued" as still-speaking would turn trailing human utterances into
    /// interruptions.
    fn ended(&self) -> bool {
        self.chunks.is_empty() || self.last_ack == self.chunks.len() - 1
    }
}

/// Ledger of every agent utterance in one conversation.
pub struct AgentVoiceLedger {
    conversation_id: String,
    speeches: Vec<AgentSpeech>,
}

impl AgentVoiceLedger {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            speeches: Vec::new(),
        }
    }

    /// Open a fresh speech; subsequent chunks are recorded into it.
    pub fn begin_speech(&mut self) {
        self.speeches.push(AgentSpeech::default());
        debug!(
            speeches = self.speeches.len(),
            "New agent speech started"
        );
    }

    /// Record one sent chunk and return its mark id.
    pub fn record_chunk(&mut self, audio: Vec<u8>) -> String {
        if self.speeches.is_empty() {
            error!("Chunk recorded before any speech began");
            self.speeches.push(AgentSpeech::default());
        }
        let speech_idx = self.speeches.len() - 1;
        let speech = &mut self.speeches[speech_idx];
        let mark_id = format!(
            "{}_{}_{}",
            self.conversation_id,
            speech_idx,
            speech.chunks.len()
        );
        speech.chunks.push(AgentSpeechChunk {
            audio,
            mark_id: mark_id.clone(),
        });
        mark_id
    }

    /// Apply a playback acknowledgement from the client.
    ///
    /// Acks for anything but the current speech arrive after a restream or
    /// a new turn has already superseded it; they are ignored.
    pub fn ack_mark(&mut self, speech_idx: usize, chunk_idx: usize) {
        let current = match self.speeches.len().checked_sub(1) {
            Some(current) => current,
            None => {
                warn!(speech_idx, chunk_idx, "Mark received before any speech");
                return;
            }
        };
        if speech_idx != current {
            warn!(speech_idx, current, "Late mark for a superseded speech");
            return;
        }
        self.speeches[current].ack(chunk_idx);
    }

    /// Record the stop point on the current speech.
    pub fn stop_current(&mut self) {
        match self.speeches.last_mut() {
            Some(speech) => speech.stop_sent(),
            None => warn!("Stop requested before any speech"),
        }
    }

    /// Chunks from the stop point to the end of the current speech.
    pub fn unspoken_tail(&self) -> Vec<AgentSpeechChunk> {
        self.speeches
            .last()
            .map(|s| s.unspoken().to_vec())
            .unwrap_or_default()
    }

    pub fn was_interrupted(&self) -> bool {
        self.speeches.last().is_some_and(AgentSpeech::was_interrupted)
    }

    pub fn is_speaking(&self) -> bool {
        self.speeches.last().is_some_and(|s| !s.ended())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_with_chunks(n: usize) -> AgentVoiceLedger {
        let mut ledger = AgentVoiceLedger::new("conv");
        ledger.begin_speech();
        for i in 0..n {
            ledger.record_chunk(vec![i as u8; 4]);
        }
        ledger
    }

    #[test]
    fn mark_ids_encode_speech_and_chunk_index() {
        let mut ledger = AgentVoiceLedger::new("conv");
        ledger.begin_speech();
        assert_eq!(ledger.record_chunk(vec![0]), "conv_0_0");
        assert_eq!(ledger.record_chunk(vec![1]), "conv_0_1");
        ledger.begin_speech();
        assert_eq!(ledger.record_chunk(vec![2]), "conv_1_0");
    }

    #[test]
    fn speaking_until_final_chunk_acked() {
        let mut ledger = ledger_with_chunks(3);
        assert!(ledger.is_speaking());

        ledger.ack_mark(0, 0);
        assert!(ledger.is_speaking());
        ledger.ack_mark(0, 1);
        assert!(ledger.is_speaking());
        ledger.ack_mark(0, 2);
        assert!(!ledger.is_speaking());
    }

    #[test]
    fn empty_speech_is_not_speaking() {
        let mut ledger = AgentVoiceLedger::new("conv");
        assert!(!ledger.is_speaking());
        ledger.begin_speech();
        assert!(!ledger.is_speaking());
    }

    #[test]
    fn single_chunk_speech_counts_as_over() {
        let ledger = ledger_with_chunks(1);
        assert!(!ledger.is_speaking());
    }

    #[test]
    fn late_marks_are_ignored() {
        let mut ledger = ledger_with_chunks(3);
        ledger.begin_speech();
        ledger.record_chunk(vec![9]);
        ledger.record_chunk(vec![9]);

        // Ack for speech 0 arrives after speech 1 began
        ledger.ack_mark(0, 2);
        assert!(ledger.is_speaking());

        ledger.ack_mark(1, 1);
        assert!(!ledger.is_speaking());
    }

    #[test]
    fn acks_beyond_range_are_clamped() {
        let mut ledger = ledger_with_chunks(2);
        ledger.ack_mark(0, 99);
        assert!(!ledger.is_speaking());
    }

    #[test]
    fn stop_records_the_ack_point_once() {
        let mut ledger = ledger_with_chunks(4);
        ledger.ack_mark(0, 1);
        ledger.stop_current();
        assert!(ledger.was_interrupted());

        let tail: Vec<String> = ledger
            .unspoken_tail()
            .into_iter()
            .map(|c| c.mark_id)
            .collect();
        assert_eq!(tail, vec!["conv_0_1", "conv_0_2", "conv_0_3"]);

        // A second stop must not move the stop point
        ledger.ack_mark(0, 3);
        ledger.stop_current();
        assert_eq!(ledger.unspoken_tail().len(), 3);
    }

    #[test]
    fn fresh_speech_is_not_interrupted() {
        let mut ledger = ledger_with_chunks(2);
        ledger.ack_mark(0, 0);
        ledger.stop_current();
        assert!(ledger.was_interrupted());

        ledger.begin_speech();
        assert!(!ledger.was_interrupted());
    }
}
