//! Primary provider: conversational agent over a signed WebSocket.
//!
//! Inbound frames are decoded at the boundary into [`AgentEvent`]. The frames may arrive in
//! any order; a turn resolves only on the agent's text response, even when audio came first.

use super::{PrimaryProvider, PrimaryReply, SignedUrlClient};
use crate::error::{ProviderError, ProviderResult};
use crate::types::AudioRef;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Audio format the agent streams back.
pub const AGENT_AUDIO_MIME: &str = "audio/pcm;rate=16000";

/// One inbound agent frame.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    ConversationInitiation { conversation_id: String },
    Audio { audio_base64: String },
    AgentResponse { text: String },
    UserTranscript { text: String },
    Ping { event_id: u64 },
    /// Well-formed frame of a type this client does not handle.
    Unknown { kind: String },
    Malformed(String),
}

impl AgentEvent {
    pub fn decode(raw: &str) -> Self {
        let value: Value = match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(e) => return AgentEvent::Malformed(e.to_string()),
        };
        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return AgentEvent::Malformed("missing type".into());
        };

        let field = |outer: &str, inner: &str| -> Option<Value> {
            value.get(outer).and_then(|o| o.get(inner)).cloned()
        };
        let text_field = |outer: &str, inner: &str| -> Option<String> {
            field(outer, inner).and_then(|v| v.as_str().map(str::to_string))
        };

        let decoded = match kind {
            "conversation_initiation_metadata" => text_field("conversation_initiation_metadata_event", "conversation_id")
                .map(|conversation_id| AgentEvent::ConversationInitiation { conversation_id }),
            "audio" => text_field("audio_event", "audio_base_64")
                .map(|audio_base64| AgentEvent::Audio { audio_base64 }),
            "agent_response" => text_field("agent_response_event", "agent_response")
                .map(|text| AgentEvent::AgentResponse { text }),
            "user_transcript" => text_field("user_transcription_event", "user_transcript")
                .map(|text| AgentEvent::UserTranscript { text }),
            "ping" => field("ping_event", "event_id")
                .and_then(|v| v.as_u64())
                .map(|event_id| AgentEvent::Ping { event_id }),
            other => return AgentEvent::Unknown { kind: other.to_string() },
        };
        decoded.unwrap_or_else(|| AgentEvent::Malformed(format!("{kind} frame missing payload")))
    }
}

/// Outbound client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    ConversationInitiationClientData { conversation_id: String },
    UserMessage { text: String },
    Pong { event_id: u64 },
}

impl ClientFrame {
    pub fn to_message(&self) -> ProviderResult<Message> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }
}

/// What the socket loop does after an event.
#[derive(Debug)]
pub enum Step {
    Continue,
    Send(ClientFrame),
    Done(PrimaryReply),
}

/// Accumulates one turn's frames until the agent's text response arrives.
#[derive(Debug, Default)]
pub struct ReplyCollector {
    conversation_id: Option<String>,
    audio: Vec<u8>,
}

impl ReplyCollector {
    /// Start with the conversation id being continued, if any.
    pub fn new(conversation_id: Option<&str>) -> Self {
        Self {
            conversation_id: conversation_id.map(str::to_string),
            audio: Vec::new(),
        }
    }

    pub fn on_event(&mut self, event: AgentEvent) -> Step {
        match event {
            AgentEvent::ConversationInitiation { conversation_id } => {
                debug!(%conversation_id, "agent conversation initiated");
                self.conversation_id = Some(conversation_id);
                Step::Continue
            }
            AgentEvent::Audio { audio_base64 } => {
                match BASE64.decode(audio_base64.as_bytes()) {
                    Ok(bytes) => self.audio.extend_from_slice(&bytes),
                    Err(e) => warn!(error = %e, "agent audio chunk is not valid base64; ignored"),
                }
                Step::Continue
            }
            AgentEvent::AgentResponse { text } => {
                let audio = (!self.audio.is_empty())
                    .then(|| AudioRef::new(std::mem::take(&mut self.audio), AGENT_AUDIO_MIME));
                Step::Done(PrimaryReply {
                    text,
                    audio,
                    conversation_id: self.conversation_id.take(),
                })
            }
            AgentEvent::UserTranscript { text } => {
                debug!(%text, "agent echoed user transcript");
                Step::Continue
            }
            AgentEvent::Ping { event_id } => Step::Send(ClientFrame::Pong { event_id }),
            AgentEvent::Unknown { kind } => {
                debug!(%kind, "ignoring agent event");
                Step::Continue
            }
            AgentEvent::Malformed(reason) => {
                warn!(%reason, "malformed agent message ignored");
                Step::Continue
            }
        }
    }
}

/// Opens a fresh signed socket per turn and passes the stored conversation id back to the agent.
pub struct AgentSocketProvider {
    signer: SignedUrlClient,
}

impl AgentSocketProvider {
    pub fn new(signer: SignedUrlClient) -> Self {
        Self { signer }
    }
}

#[async_trait]
impl PrimaryProvider for AgentSocketProvider {
    async fn converse(&self, text: &str, conversation_id: Option<&str>) -> ProviderResult<PrimaryReply> {
        let url = self.signer.signed_url().await?;
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut stream) = socket.split();

        if let Some(id) = conversation_id {
            let frame = ClientFrame::ConversationInitiationClientData { conversation_id: id.to_string() };
            sink.send(frame.to_message()?).await?;
        }
        sink.send(ClientFrame::UserMessage { text: text.to_string() }.to_message()?)
            .await?;

        let mut collector = ReplyCollector::new(conversation_id);
        while let Some(msg) = stream.next().await {
            let raw = match msg? {
                Message::Text(raw) => raw,
                Message::Close(_) => break,
                _ => continue,
            };
            match collector.on_event(AgentEvent::decode(&raw)) {
                Step::Continue => {}
                Step::Send(frame) => sink.send(frame.to_message()?).await?,
                Step::Done(reply) => {
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok(reply);
                }
            }
        }
        Err(ProviderError::ChannelClosed)
    }
}
