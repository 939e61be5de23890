//! Per-connection session lifecycle.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use base64::Engine;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use voxline_convo::{ConversationEvent, ConversationOrchestrator};
use voxline_core::config::MediaFormat;

use crate::mulaw;
use crate::schema::{parse_mark_name, InboundFrame, MarkName, MediaPayload, OutboundFrame};
use crate::server::GatewayState;

struct Session {
    orchestrator: ConversationOrchestrator,
    forward: JoinHandle<()>,
    stream_sid: String,
}

/// Drive one WebSocket connection until the client closes or disconnects.
pub async fn handle_socket(state: Arc<GatewayState>, socket: WebSocket) {
    let (ws_sink, mut ws_source) = socket.split();

    // Single writer task; everything outbound funnels through one channel.
    let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(write_outbound(out_rx, ws_sink));

    let media_format = state
        .config
        .gateway
        .as_ref()
        .map(|g| g.media_format)
        .unwrap_or_default();

    let mut session: Option<Session> = None;

    while let Some(message) = ws_source.next().await {
        let message = match message {
            Ok(m) => m,
            Err(e) => {
                info!(%e, "WebSocket read failed, closing session");
                break;
            }
        };
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let frame: InboundFrame = match serde_json::from_str(&text) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%e, "Unparseable inbound frame");
                continue;
            }
        };

        match frame {
            InboundFrame::Connected => {
                info!("Client connected");
            }

            InboundFrame::Start { start } => {
                if let Some(old) = session.take() {
                    warn!(
                        stream_sid = %old.stream_sid,
                        "Duplicate start frame, replacing session"
                    );
                    old.orchestrator.end_conversation();
                    old.forward.abort();
                    state.active_conversations.fetch_sub(1, Ordering::SeqCst);
                }
                let stream_sid = start.stream_sid;
                info!(%stream_sid, "Stream started");

                let detector = match (state.detector_factory)() {
                    Ok(detector) => detector,
                    Err(e) => {
                        error!(%e, "Could not build a speech detector");
                        break;
                    }
                };
                let (orchestrator, events_rx) = ConversationOrchestrator::start(
                    &stream_sid,
                    state.voice_agent.clone(),
                    detector,
                    state.config.audio.clone(),
                );
                state.active_conversations.fetch_add(1, Ordering::SeqCst);

                let forward = tokio::spawn(forward_events(events_rx, out_tx.clone()));
                session = Some(Session {
                    orchestrator,
                    forward,
                    stream_sid,
                });
            }

            InboundFrame::Media { media } => {
                let Some(session) = &session else {
                    warn!("Media before start, dropping frame");
                    continue;
                };
                match base64::engine::general_purpose::STANDARD.decode(&media.payload) {
                    Ok(bytes) => {
                        let pcm = match media_format {
                            MediaFormat::Mulaw => mulaw::decode(&bytes),
                            MediaFormat::Pcm16 => bytes,
                        };
                        session.orchestrator.audio_received(&pcm);
                    }
                    Err(e) => warn!(%e, "Invalid base64 media payload"),
                }
            }

            InboundFrame::Mark { mark } => {
                let Some(session) = &session else {
                    warn!("Mark before start, dropping frame");
                    continue;
                };
                match parse_mark_name(&mark.name) {
                    Some((speech_idx, chunk_idx)) => {
                        debug!(name = %mark.name, "Mark acknowledged");
                        session
                            .orchestrator
                            .agent_speech_marked(speech_idx, chunk_idx);
                    }
                    None => warn!(name = %mark.name, "Malformed mark name"),
                }
            }

            InboundFrame::Closed => {
                info!("Client closed the stream");
                break;
            }
        }
    }

    if let Some(session) = session {
        info!(stream_sid = %session.stream_sid, "Cleaning up conversation");
        session.orchestrator.end_conversation();
        session.forward.abort();
        state.active_conversations.fetch_sub(1, Ordering::SeqCst);
    }
    drop(out_tx);
    let _ = writer.await;
}

/// Map conversation events onto wire frames.
async fn forward_events(
    mut events_rx: mpsc::UnboundedReceiver<ConversationEvent>,
    out_tx: mpsc::UnboundedSender<String>,
) {
    while let Some(event) = events_rx.recv().await {
        let frame = match event {
            ConversationEvent::Media { audio } => OutboundFrame::Media {
                media: MediaPayload {
                    payload: base64::engine::general_purpose::STANDARD.encode(audio),
                },
            },
            ConversationEvent::Mark { mark_id } => OutboundFrame::Mark {
                mark: MarkName { name: mark_id },
            },
            ConversationEvent::StopSpeaking => OutboundFrame::Clear,
            ConversationEvent::StartResponding => OutboundFrame::StartResponding,
            ConversationEvent::StartRestream => OutboundFrame::StartRestream,
            ConversationEvent::Result { summary } => OutboundFrame::Result { result: summary },
        };
        match serde_json::to_string(&frame) {
            Ok(text) => {
                if out_tx.send(text).is_err() {
                    break;
                }
            }
            Err(e) => error!(%e, "Failed to serialize outbound frame"),
        }
    }
}

async fn write_outbound(
    mut out_rx: mpsc::UnboundedReceiver<String>,
    mut sink: SplitSink<WebSocket, Message>,
) {
    while let Some(text) = out_rx.recv().await {
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
}
