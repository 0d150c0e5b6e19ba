//! Playback on the connected client: response audio goes out as one binary frame and the
//! turn stays in `Playing` until the client reports `playback_finished`.

use async_trait::async_trait;
use axum::extract::ws::Message;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};
use voxbridge_core::AudioRef;
use voxbridge_voice::{PlaybackSink, VoiceError, VoiceResult};

pub struct SocketPlayback {
    outbound: mpsc::UnboundedSender<Message>,
    done: Notify,
    ack_timeout: Duration,
}

impl SocketPlayback {
    pub fn new(outbound: mpsc::UnboundedSender<Message>, ack_timeout: Duration) -> Self {
        Self {
            outbound,
            done: Notify::new(),
            ack_timeout,
        }
    }

    /// The client finished playing the last frame.
    pub fn finished(&self) {
        self.done.notify_waiters();
    }
}

#[async_trait]
impl PlaybackSink for SocketPlayback {
    async fn play(&self, audio: &AudioRef) -> VoiceResult<()> {
        if audio.is_empty() {
            return Ok(());
        }
        let done = self.done.notified();
        tokio::pin!(done);
        done.as_mut().enable();

        self.outbound
            .send(Message::Binary(audio.bytes().to_vec()))
            .map_err(|_| VoiceError::ChannelUnavailable("client socket closed".to_string()))?;
        debug!(id = %audio.id, bytes = audio.len(), mime = %audio.mime, "response audio sent");

        if tokio::time::timeout(self.ack_timeout, done).await.is_err() {
            warn!(id = %audio.id, timeout = ?self.ack_timeout, "no playback_finished from client; assuming done");
        }
        Ok(())
    }

    fn stop(&self) {
        self.done.notify_waiters();
    }
}
