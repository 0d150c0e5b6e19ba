//! `GET /ws/voice`: one TurnSession per connection.
//!
//! Inbound binary frames are PCM16 LE mono audio at `server.client_sample_rate`; inbound text frames
//! are JSON [`ClientCommand`]s. Outbound text frames are JSON [`SessionEvent`]s; outbound binary
//! frames are response audio.
//!
//! A new socket for a session id that is already live takes the conversation over; the older
//! socket's session is shut down and that socket is closed.

use crate::playback::SocketPlayback;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use voxbridge_voice::{
    pcm, ClientCommand, PushAudioSource, SessionEvent, TurnConfig, TurnDeps, TurnSession, TurnSessionHandle,
};

#[derive(Debug, Deserialize)]
pub struct VoiceParams {
    /// Resume a conversation prepared over HTTP (e.g. with a scenario). A fresh id otherwise.
    #[serde(default)]
    session_id: Option<String>,
}

pub async fn voice_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<VoiceParams>,
) -> Response {
    let session_id = params
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    ws.on_upgrade(move |socket| run_voice_socket(socket, state, session_id))
}

async fn run_voice_socket(socket: WebSocket, state: AppState, session_id: String) {
    let (mut sink, mut stream) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let source = PushAudioSource::new(state.config.server.client_sample_rate);
    let playback = Arc::new(SocketPlayback::new(
        outbound.clone(),
        Duration::from_millis(state.config.server.playback_ack_timeout_ms),
    ));
    let deps = TurnDeps {
        source: Arc::new(source.clone()),
        transcriber: Arc::clone(&state.transcriber),
        resolver: Arc::clone(&state.resolver),
        synthesizer: Arc::clone(&state.synthesizer),
        playback: playback.clone(),
        transport: None,
    };
    let (handle, mut events) = TurnSession::spawn(session_id.clone(), deps, TurnConfig::from_config(&state.config));
    state.registry.insert(handle.clone());
    info!(session_id = %session_id, live_sessions = state.registry.len(), "voice socket connected");

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if sink.send(msg).await.is_err() {
                break;
            }
        }
    });

    let events_out = outbound.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if send_event(&events_out, &event).is_err() {
                return;
            }
        }
        // The session ended while the socket is open: it was replaced by a newer connection.
        let _ = events_out.send(Message::Close(None));
    });

    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "voice socket read failed");
                break;
            }
        };
        match msg {
            Message::Binary(bytes) => {
                source.push(pcm::decode_pcm16_le(&bytes));
            }
            Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => apply_command(&handle, &playback, command).await,
                Err(e) => {
                    warn!(session_id = %session_id, error = %e, "unrecognized client command");
                    let _ = send_event(
                        &outbound,
                        &SessionEvent::Error {
                            reason: format!("unrecognized command: {}", e),
                        },
                    );
                }
            },
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.registry.release(&handle);
    handle.stop();
    drop(handle);
    forwarder.abort();
    writer.abort();
    info!(session_id = %session_id, "voice socket closed");
}

async fn apply_command(handle: &TurnSessionHandle, playback: &SocketPlayback, command: ClientCommand) {
    debug!(session_id = %handle.session_id(), ?command, "client command");
    match command {
        // Failures are also reported to the client as an error event.
        ClientCommand::Start { detection } => {
            if let Err(e) = handle.start_with(detection).await {
                debug!(session_id = %handle.session_id(), error = %e, "start failed");
            }
        }
        ClientCommand::Stop => handle.stop(),
        ClientCommand::Clear => handle.clear(),
        ClientCommand::PlaybackFinished => playback.finished(),
    }
}

fn send_event(outbound: &mpsc::UnboundedSender<Message>, event: &SessionEvent) -> Result<(), ()> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "session event not serializable");
            return Ok(());
        }
    };
    outbound.send(Message::Text(json)).map_err(|_| ())
}
