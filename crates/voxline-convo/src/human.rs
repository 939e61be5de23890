//! Inbound audio bookkeeping — accumulation, window alignment, and the
//! "unanswered speech" assembly used after cancelled turns.

use tracing::{debug, error};

use voxline_core::config::AudioConfig;

use crate::vad::SpeechSegment;

/// Silence joint between concatenated utterances, in samples (~10ms at 8kHz).
const SILENCE_JOINT_SAMPLES: u64 = 80;

pub struct HumanVoiceBuffer {
    /// Everything received since the last completed utterance.
    backing: Vec<u8>,
    /// Received but not yet fed through the VAD.
    fresh: Vec<u8>,
    /// The most recent completed utterance, sliced out of `backing`.
    last_speech: Vec<u8>,
    /// Cumulative byte offset of `backing[0]` since this buffer was created.
    /// Keeps the gate's absolute sample offsets valid across clears.
    base_offset: u64,
    window_bytes: usize,
    bytes_per_sample: u64,
}

impl HumanVoiceBuffer {
    pub fn new(audio: &AudioConfig) -> Self {
        Self {
            backing: Vec::new(),
            fresh: Vec::new(),
            last_speech: Vec::new(),
            base_offset: 0,
            window_bytes: audio.window_bytes(),
            bytes_per_sample: u64::from(audio.bytes_per_sample),
        }
    }

    pub fn append(&mut self, pcm: &[u8]) {
        self.backing.extend_from_slice(pcm);
        self.fresh.extend_from_slice(pcm);
    }

    /// True once at least one whole VAD window is waiting.
    pub fn ready_to_process(&self) -> bool {
        self.fresh.len() >= self.window_bytes
    }

    /// Take the longest window-aligned prefix of unprocessed audio.
    /// The remainder stays for the next call.
    pub fn take_aligned(&mut self) -> Vec<u8> {
        let aligned = self.fresh.len() / self.window_bytes * self.window_bytes;
        let taken: Vec<u8> = self.fresh.drain(..aligned).collect();
        debug!(
            taken = taken.len(),
            remaining = self.fresh.len(),
            "Pulled aligned audio for VAD"
        );
        taken
    }

    /// Slice the completed utterance out of the backing buffer and clear it.
    ///
    /// Audio before the utterance (including anything captured after the
    /// gate's internal end marker) is discarded; new ingress keeps
    /// accumulating, so nothing the human says next is lost.
    pub fn on_speech_ended(&mut self, segment: &SpeechSegment) {
        let Some(end_sample) = segment.end_sample else {
            error!(
                start_sample = segment.start_sample,
                "Speech-ended without an end sample"
            );
            return;
        };

        let from = self.clamp_to_backing(segment.start_sample);
        let to = self.clamp_to_backing(end_sample);
        self.last_speech = self.backing[from..to].to_vec();
        debug!(
            bytes = self.last_speech.len(),
            discarded = self.backing.len() - self.last_speech.len(),
            "Sliced human utterance"
        );

        self.base_offset += self.backing.len() as u64;
        self.backing.clear();
    }

    /// Drop the last utterance so it can never reach transcription.
    pub fn discard_last_speech(&mut self) {
        self.last_speech.clear();
    }

    /// Concatenate the inputs of cancelled turns and the latest utterance,
    /// separated (and joined to the tail) by short silence so transcription
    /// does not smear them into one word.
    pub fn assemble_unanswered(&self, cancelled_inputs: &[Vec<u8>]) -> Vec<u8> {
        if cancelled_inputs.is_empty() {
            return self.last_speech.clone();
        }

        let joint = vec![0u8; (SILENCE_JOINT_SAMPLES * self.bytes_per_sample) as usize];
        let mut assembled = Vec::new();
        for input in cancelled_inputs {
            assembled.extend_from_slice(input);
            assembled.extend_from_slice(&joint);
        }
        assembled.extend_from_slice(&self.last_speech);
        assembled
    }

    fn clamp_to_backing(&self, sample: u64) -> usize {
        let byte = (sample * self.bytes_per_sample).saturating_sub(self.base_offset);
        (byte as usize).min(self.backing.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> HumanVoiceBuffer {
        HumanVoiceBuffer::new(&AudioConfig::default())
    }

    fn ended_segment(start_sample: u64, end_sample: u64) -> SpeechSegment {
        SpeechSegment {
            start_sample,
            end_sample: Some(end_sample),
            ended: true,
            interruption_threshold_ms: 600,
            sample_rate: 8000,
        }
    }

    #[test]
    fn aligned_prefix_leaves_remainder() {
        let mut buffer = buffer();
        buffer.append(&[1u8; 512 + 100]);
        assert!(buffer.ready_to_process());

        let taken = buffer.take_aligned();
        assert_eq!(taken.len(), 512);
        assert!(!buffer.ready_to_process());

        // The remainder completes on the next append
        buffer.append(&[2u8; 412]);
        assert_eq!(buffer.take_aligned().len(), 512);
    }

    #[test]
    fn not_ready_below_one_window() {
        let mut buffer = buffer();
        buffer.append(&[0u8; 511]);
        assert!(!buffer.ready_to_process());
        assert!(buffer.take_aligned().is_empty());
    }

    #[test]
    fn slices_utterance_by_sample_offsets() {
        let mut buffer = buffer();
        let mut pcm = vec![0u8; 1000];
        pcm.extend(vec![7u8; 600]);
        pcm.extend(vec![0u8; 400]);
        buffer.append(&pcm);

        // Samples 500..800 are the 7-filled bytes 1000..1600
        buffer.on_speech_ended(&ended_segment(500, 800));
        assert_eq!(buffer.assemble_unanswered(&[]), vec![7u8; 600]);
    }

    #[test]
    fn offsets_stay_valid_after_clear() {
        let mut buffer = buffer();
        buffer.append(&vec![1u8; 2000]);
        buffer.on_speech_ended(&ended_segment(100, 900));

        // A second utterance arrives after the backing buffer was cleared;
        // the gate's offsets keep counting from the start of the stream.
        buffer.append(&vec![2u8; 2000]);
        buffer.on_speech_ended(&ended_segment(1200, 1500));
        assert_eq!(buffer.assemble_unanswered(&[]), vec![2u8; 600]);
    }

    #[test]
    fn out_of_range_offsets_are_clamped() {
        let mut buffer = buffer();
        buffer.append(&[3u8; 100]);
        buffer.on_speech_ended(&ended_segment(0, 10_000));
        assert_eq!(buffer.assemble_unanswered(&[]), vec![3u8; 100]);
    }

    #[test]
    fn assembly_joins_with_exact_silence() {
        let mut buffer = buffer();
        buffer.append(&[9u8; 512]);
        buffer.on_speech_ended(&ended_segment(0, 256));
        let last = vec![9u8; 512];

        let a = vec![1u8; 300];
        let b = vec![2u8; 500];
        let assembled = buffer.assemble_unanswered(&[a.clone(), b.clone()]);

        assert_eq!(assembled.len(), 300 + 160 + 500 + 160 + 512);
        assert_eq!(&assembled[..300], &a[..]);
        assert!(assembled[300..460].iter().all(|&x| x == 0));
        assert_eq!(&assembled[460..960], &b[..]);
        assert!(assembled[960..1120].iter().all(|&x| x == 0));
        assert_eq!(&assembled[1120..], &last[..]);
    }

    #[test]
    fn assembly_without_cancelled_inputs_is_last_speech_alone() {
        let mut buffer = buffer();
        buffer.append(&[5u8; 512]);
        buffer.on_speech_ended(&ended_segment(0, 256));
        assert_eq!(buffer.assemble_unanswered(&[]), vec![5u8; 512]);
    }

    #[test]
    fn discard_clears_the_last_utterance() {
        let mut buffer = buffer();
        buffer.append(&[5u8; 512]);
        buffer.on_speech_ended(&ended_segment(0, 256));
        buffer.discard_last_speech();
        assert!(buffer.assemble_unanswered(&[]).is_empty());
    }
}
