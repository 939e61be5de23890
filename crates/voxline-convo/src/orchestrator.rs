//! The long-running driver for one conversation.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use voxline_core::config::AudioConfig;
use voxline_voice::VoiceAgent;

use crate::conversation::{Conversation, ResponseTaskRecord};
use crate::events::ConversationEvent;
use crate::turn::TurnState;
use crate::vad::{SpeechDetector, VadGate};

/// Drives one conversation: ticks the VAD over buffered ingress, dispatches
/// turn actions, and owns every response task.
///
/// Ingress entry points (`audio_received`, `agent_speech_marked`) are cheap
/// bookkeeping and safe to call from the transport; the loop and response
/// tasks run on spawned tokio tasks until [`end_conversation`] or drop.
///
/// [`end_conversation`]: ConversationOrchestrator::end_conversation
pub struct ConversationOrchestrator {
    conversation: Arc<Mutex<Conversation>>,
    cancel: CancellationToken,
}

impl ConversationOrchestrator {
    /// Spawn the loop and return the handle plus the outbound event stream.
    pub fn start(
        conversation_id: impl Into<String>,
        voice_agent: Arc<dyn VoiceAgent>,
        detector: Box<dyn SpeechDetector>,
        audio: AudioConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ConversationEvent>) {
        let conversation_id = conversation_id.into();
        let conversation = Arc::new(Mutex::new(Conversation::new(&conversation_id, &audio)));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let gate = VadGate::new(detector, &audio);

        let loop_conversation = conversation.clone();
        let loop_cancel = cancel.clone();
        tokio::spawn(async move {
            info!(conversation = %conversation_id, "Conversation loop started");
            run_loop(
                loop_conversation,
                gate,
                voice_agent,
                event_tx,
                loop_cancel,
                audio,
                conversation_id.clone(),
            )
            .await;
            info!(conversation = %conversation_id, "Conversation loop ended");
        });

        (
            Self {
                conversation,
                cancel,
            },
            event_rx,
        )
    }

    /// Buffer one frame of inbound PCM.
    pub fn audio_received(&self, pcm: &[u8]) {
        self.conversation().audio_received(pcm);
    }

    /// Apply a playback acknowledgement from the client.
    pub fn agent_speech_marked(&self, speech_idx: usize, chunk_idx: usize) {
        self.conversation()
            .agent_speech_marked(speech_idx, chunk_idx);
    }

    /// Tear down: cancels the loop and every outstanding response task.
    pub fn end_conversation(&self) {
        info!("Ending conversation");
        self.cancel.cancel();
    }

    fn conversation(&self) -> MutexGuard<'_, Conversation> {
        self.conversation.lock().expect("conversation state poisoned")
    }
}

impl Drop for ConversationOrchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lock(conversation: &Arc<Mutex<Conversation>>) -> MutexGuard<'_, Conversation> {
    conversation.lock().expect("conversation state poisoned")
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    conversation: Arc<Mutex<Conversation>>,
    mut gate: VadGate,
    voice_agent: Arc<dyn VoiceAgent>,
    events: mpsc::UnboundedSender<ConversationEvent>,
    cancel: CancellationToken,
    audio: AudioConfig,
    conversation_id: String,
) {
    let tick = Duration::from_millis(audio.tick_interval_ms);
    let one_second = (audio.sample_rate * audio.bytes_per_sample) as usize;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(tick) => {}
        }

        let chunk = {
            let mut convo = lock(&conversation);
            if !convo.ready_to_process() {
                continue;
            }
            convo.take_aligned()
        };
        if chunk.len() > one_second {
            warn!(
                bytes = chunk.len(),
                "Processing more than a second of buffered audio in one tick"
            );
        }

        let segment = match gate.step(&chunk) {
            Ok(segment) => segment,
            Err(e) => {
                error!(%e, "Voice activity gate failed, ending conversation");
                cancel.cancel();
                break;
            }
        };

        // Slice the utterance out of the buffer before classification so
        // the ledger predicates see a settled state.
        let state = {
            let mut convo = lock(&conversation);
            if let Some(segment) = segment.as_ref().filter(|s| s.ended) {
                convo.human_speech_ended(segment);
            }
            match convo.turn_state(segment.as_ref()) {
                Ok(state) => state,
                Err(e) => {
                    error!(%e, "Turn classification failed, ending conversation");
                    cancel.cancel();
                    break;
                }
            }
        };
        debug!(?state, "Conversation state");

        match state {
            TurnState::HumanSilent | TurnState::HumanStartedSpeaking => {}

            TurnState::BothSpeaking => {
                let first_overlap_tick = {
                    let mut convo = lock(&conversation);
                    if convo.agent_was_interrupted() {
                        false
                    } else {
                        convo.stop_speaking_agent();
                        true
                    }
                };
                if first_overlap_tick {
                    info!("Human and agent are speaking; stopping agent playback");
                    let _ = events.send(ConversationEvent::StopSpeaking);
                }
            }

            TurnState::ShortInterruption => {
                info!("Short interruption; restreaming interrupted speech");
                restream(&conversation, &events);
            }

            TurnState::LongInterruption | TurnState::ShortSpeech | TurnState::LongSpeech => {
                let human_speech = lock(&conversation).unanswered_human_speech();
                let task_cancel = cancel.child_token();
                let handle = tokio::spawn(handle_respond_to_human(
                    conversation.clone(),
                    voice_agent.clone(),
                    events.clone(),
                    human_speech.clone(),
                    task_cancel.clone(),
                    conversation_id.clone(),
                ));
                lock(&conversation).add_response_task(ResponseTaskRecord {
                    invoked_with_speech: human_speech,
                    handle,
                    cancel: task_cancel,
                });
            }
        }
    }
}

/// Stream one agent response: STT → LLM → TTS via the voice agent, emitting
/// media+mark pairs in chunk order and a final result.
///
/// Cancellation is observed at the next chunk read; a cancelled task emits
/// nothing further.
async fn handle_respond_to_human(
    conversation: Arc<Mutex<Conversation>>,
    voice_agent: Arc<dyn VoiceAgent>,
    events: mpsc::UnboundedSender<ConversationEvent>,
    human_speech: Vec<u8>,
    cancel: CancellationToken,
    conversation_id: String,
) {
    if cancel.is_cancelled() {
        return;
    }

    let _ = events.send(ConversationEvent::StartResponding);
    lock(&conversation).new_agent_speech();

    let mut response = voice_agent.respond(human_speech, &conversation_id);

    loop {
        let chunk = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Response task cancelled mid-stream");
                return;
            }
            chunk = response.chunks.recv() => chunk,
        };
        let Some(chunk) = chunk else { break };
        if cancel.is_cancelled() {
            return;
        }

        let _ = events.send(ConversationEvent::Media {
            audio: chunk.audio.clone(),
        });
        let mark_id = lock(&conversation).agent_chunk_sent(chunk.audio);
        let _ = events.send(ConversationEvent::Mark { mark_id });
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {}
        summary = &mut response.summary => match summary {
            Ok(summary) => {
                let _ = events.send(ConversationEvent::Result { summary });
            }
            Err(_) => warn!("Response pipeline ended without a summary"),
        }
    }
}

/// Replay the unspoken tail of an interrupted speech as a fresh speech.
///
/// The interrupted speech stays frozen in the ledger with its stop point;
/// replayed chunks are re-recorded under new mark ids.
fn restream(
    conversation: &Arc<Mutex<Conversation>>,
    events: &mpsc::UnboundedSender<ConversationEvent>,
) {
    let _ = events.send(ConversationEvent::StartRestream);

    let tail = {
        let mut convo = lock(conversation);
        let tail = convo.unspoken_agent_speech();
        convo.new_agent_speech();
        tail
    };
    info!(chunks = tail.len(), "Restreaming unspoken agent speech");

    for chunk in tail {
        let _ = events.send(ConversationEvent::Media {
            audio: chunk.audio.clone(),
        });
        let mark_id = lock(conversation).agent_chunk_sent(chunk.audio);
        let _ = events.send(ConversationEvent::Mark { mark_id });
    }

    // The back-channel that triggered the restream is never transcribed.
    lock(conversation).discard_last_speech();
}
