//! Voice activity gate — turns window-aligned PCM into speech segments.

use tracing::debug;

use voxline_core::config::AudioConfig;

use crate::error::ConvoError;

/// Per-window speech probability model.
///
/// Implementations hold recurrent state across windows; `reset` clears it
/// after an utterance so the next one starts cold.
pub trait SpeechDetector: Send {
    fn predict(&mut self, frame: &[i16]) -> Result<f32, ConvoError>;
    fn reset(&mut self) -> Result<(), ConvoError>;
}

/// Silero VAD inference via ONNX.
pub struct SileroDetector {
    inner: voice_activity_detector::VoiceActivityDetector,
    sample_rate: u32,
    chunk_size: usize,
}

impl SileroDetector {
    pub fn new(sample_rate: u32, chunk_size: usize) -> Result<Self, ConvoError> {
        Ok(Self {
            inner: Self::build(sample_rate, chunk_size)?,
            sample_rate,
            chunk_size,
        })
    }

    fn build(
        sample_rate: u32,
        chunk_size: usize,
    ) -> Result<voice_activity_detector::VoiceActivityDetector, ConvoError> {
        voice_activity_detector::VoiceActivityDetector::builder()
            .sample_rate(sample_rate)
            .chunk_size(chunk_size)
            .build()
            .map_err(|e| ConvoError::VadModel(format!("{e:?}")))
    }
}

impl SpeechDetector for SileroDetector {
    fn predict(&mut self, frame: &[i16]) -> Result<f32, ConvoError> {
        Ok(self.inner.predict(frame.to_vec()))
    }

    fn reset(&mut self) -> Result<(), ConvoError> {
        // The detector keeps LSTM state internally; a fresh build is a reset.
        self.inner = Self::build(self.sample_rate, self.chunk_size)?;
        Ok(())
    }
}

/// One detected stretch of human speech.
///
/// Offsets are cumulative sample counts since the gate was created.
/// `end_sample` is absent while the speech is still ongoing.
#[derive(Debug, Clone)]
pub struct SpeechSegment {
    pub start_sample: u64,
    pub end_sample: Option<u64>,
    pub ended: bool,
    pub interruption_threshold_ms: u32,
    pub sample_rate: u32,
}

impl SpeechSegment {
    pub fn is_shorter_than(&self, ms: u32) -> bool {
        let Some(end_sample) = self.end_sample else {
            return false;
        };
        let duration_samples = end_sample.saturating_sub(self.start_sample);
        let threshold_samples = u64::from(self.sample_rate) * u64::from(ms) / 1000;
        duration_samples < threshold_samples
    }

    /// A back-channel-length utterance. The boundary itself is long.
    pub fn is_short(&self) -> bool {
        self.is_shorter_than(self.interruption_threshold_ms)
    }

    pub fn is_long(&self) -> bool {
        !self.is_short()
    }
}

/// Stateful gate over a [`SpeechDetector`].
///
/// Implements the start/end iterator semantics the detector itself does not
/// provide: a window at or above `vad_threshold` opens a segment, and a run
/// of `vad_min_silence_ms` below the release threshold closes it, padded on
/// both sides by `vad_speech_pad_ms`.
pub struct VadGate {
    detector: Box<dyn SpeechDetector>,
    window_samples: u64,
    window_bytes: usize,
    threshold: f32,
    release_threshold: f32,
    min_silence_samples: u64,
    pad_samples: u64,
    interruption_threshold_ms: u32,
    sample_rate: u32,

    current_sample: u64,
    triggered: bool,
    speech_start: u64,
    silence_start: Option<u64>,
}

impl VadGate {
    pub fn new(detector: Box<dyn SpeechDetector>, audio: &AudioConfig) -> Self {
        Self {
            detector,
            window_samples: u64::from(audio.vad_window_samples),
            window_bytes: audio.window_bytes(),
            threshold: audio.vad_threshold,
            release_threshold: audio.vad_threshold - 0.15,
            min_silence_samples: audio.min_silence_samples(),
            pad_samples: audio.speech_pad_samples(),
            interruption_threshold_ms: audio.interruption_threshold_ms,
            sample_rate: audio.sample_rate,
            current_sample: 0,
            triggered: false,
            speech_start: 0,
            silence_start: None,
        }
    }

    /// Feed window-aligned PCM, returning at most one segment.
    ///
    /// While speech is ongoing this returns an in-progress segment on every
    /// call; the first call that observes enough trailing silence returns
    /// the ended segment and resets the detector for the next utterance.
    pub fn step(&mut self, pcm: &[u8]) -> Result<Option<SpeechSegment>, ConvoError> {
        if pcm.len() % self.window_bytes != 0 {
            return Err(ConvoError::Alignment {
                expected: self.window_bytes,
                got: pcm.len(),
            });
        }

        let mut completed: Option<SpeechSegment> = None;

        for window in pcm.chunks_exact(self.window_bytes) {
            let samples: Vec<i16> = window
                .chunks_exact(2)
                .map(|b| i16::from_le_bytes([b[0], b[1]]))
                .collect();
            let probability = self.detector.predict(&samples)?;
            self.current_sample += self.window_samples;

            if probability >= self.threshold {
                self.silence_start = None;
                if !self.triggered {
                    self.triggered = true;
                    self.speech_start = (self.current_sample - self.window_samples)
                        .saturating_sub(self.pad_samples);
                    debug!(start_sample = self.speech_start, "Speech started");
                }
                continue;
            }

            if self.triggered && probability < self.release_threshold {
                let silence_start = *self.silence_start.get_or_insert(self.current_sample);
                if self.current_sample - silence_start >= self.min_silence_samples {
                    let end_sample = silence_start + self.pad_samples;
                    debug!(
                        start_sample = self.speech_start,
                        end_sample, "Speech ended, resetting detector"
                    );
                    self.triggered = false;
                    self.silence_start = None;
                    self.detector.reset()?;
                    if completed.is_none() {
                        completed = Some(self.segment(Some(end_sample)));
                    }
                }
            }
        }

        if completed.is_some() {
            return Ok(completed);
        }
        if self.triggered {
            return Ok(Some(self.segment(None)));
        }
        Ok(None)
    }

    fn segment(&self, end_sample: Option<u64>) -> SpeechSegment {
        SpeechSegment {
            start_sample: self.speech_start,
            end_sample,
            ended: end_sample.is_some(),
            interruption_threshold_ms: self.interruption_threshold_ms,
            sample_rate: self.sample_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted detector: loud windows are speech.
    struct AmplitudeDetector {
        resets: usize,
    }

    impl SpeechDetector for AmplitudeDetector {
        fn predict(&mut self, frame: &[i16]) -> Result<f32, ConvoError> {
            let peak = frame.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
            Ok(if peak > 1000 { 0.95 } else { 0.02 })
        }

        fn reset(&mut self) -> Result<(), ConvoError> {
            self.resets += 1;
            Ok(())
        }
    }

    fn gate() -> VadGate {
        VadGate::new(
            Box::new(AmplitudeDetector { resets: 0 }),
            &AudioConfig::default(),
        )
    }

    fn loud(windows: usize) -> Vec<u8> {
        std::iter::repeat([3000i16.to_le_bytes()[0], 3000i16.to_le_bytes()[1]])
            .take(windows * 256)
            .flatten()
            .collect()
    }

    fn quiet(windows: usize) -> Vec<u8> {
        vec![0u8; windows * 512]
    }

    #[test]
    fn rejects_misaligned_input() {
        let mut gate = gate();
        let err = gate.step(&[0u8; 100]).unwrap_err();
        assert!(matches!(err, ConvoError::Alignment { expected: 512, got: 100 }));
    }

    #[test]
    fn silence_yields_no_segment() {
        let mut gate = gate();
        assert!(gate.step(&quiet(40)).unwrap().is_none());
    }

    #[test]
    fn speech_opens_an_in_progress_segment() {
        let mut gate = gate();
        assert!(gate.step(&quiet(4)).unwrap().is_none());

        let segment = gate.step(&loud(2)).unwrap().unwrap();
        assert!(!segment.ended);
        assert!(segment.end_sample.is_none());
        // 4 quiet windows precede, minus 240 samples of pad
        assert_eq!(segment.start_sample, 4 * 256 - 240);

        // Still triggered: every subsequent call reports the segment
        let again = gate.step(&quiet(1)).unwrap().unwrap();
        assert!(!again.ended);
        assert_eq!(again.start_sample, segment.start_sample);
    }

    #[test]
    fn trailing_silence_closes_the_segment() {
        let mut gate = gate();
        gate.step(&loud(10)).unwrap();

        // The silence run is measured from the end of the first silent
        // window (sample 2816); 350ms = 2800 samples needs 11 more windows.
        let segment = gate.step(&quiet(12)).unwrap().unwrap();
        assert!(segment.ended);
        let end = segment.end_sample.unwrap();
        assert_eq!(end, 11 * 256 + 240);
        assert!(end >= segment.start_sample);
    }

    #[test]
    fn offsets_accumulate_across_utterances() {
        let mut gate = gate();
        gate.step(&loud(10)).unwrap();
        let first = gate.step(&quiet(12)).unwrap().unwrap();
        assert!(first.ended);

        // A second utterance starts where the stream left off
        let second = gate.step(&loud(2)).unwrap().unwrap();
        assert!(!second.ended);
        assert_eq!(second.start_sample, 22 * 256 - 240);
    }

    #[test]
    fn whole_utterance_in_one_batch_is_returned_ended() {
        let mut gate = gate();
        let mut pcm = quiet(4);
        pcm.extend(loud(30));
        pcm.extend(quiet(13));
        let segment = gate.step(&pcm).unwrap().unwrap();
        assert!(segment.ended);
    }

    #[test]
    fn exact_threshold_duration_is_long() {
        let segment = SpeechSegment {
            start_sample: 0,
            end_sample: Some(4800), // 600ms at 8kHz
            ended: true,
            interruption_threshold_ms: 600,
            sample_rate: 8000,
        };
        assert!(segment.is_long());
        assert!(!segment.is_short());

        let shorter = SpeechSegment {
            end_sample: Some(4799),
            ..segment.clone()
        };
        assert!(shorter.is_short());
    }

    #[test]
    fn ongoing_segment_is_never_short() {
        let segment = SpeechSegment {
            start_sample: 0,
            end_sample: None,
            ended: false,
            interruption_threshold_ms: 600,
            sample_rate: 8000,
        };
        assert!(!segment.is_short());
        assert!(segment.is_long());
    }
}
