//! **AudioChunkTransport**: ships captured audio as PCM16 chunks over a bidirectional channel.
//!
//! A chunk is sent only while the channel reports itself connected; otherwise it is dropped.
//! There is no buffering. Lossy real-time audio is preferred over guaranteed delivery.

use crate::audio::AudioStream;
use crate::error::{VoiceError, VoiceResult};
use crate::events::{ClientCommand, SessionEvent};
use crate::pcm;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

/// Consecutive drops after which the outage is reported as sustained.
pub const SUSTAINED_DROP_CHUNKS: u32 = 50;

/// Outbound side of a chunk channel.
#[async_trait]
pub trait AudioChannel: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Wait until the channel can take another chunk.
    async fn ready(&self) -> VoiceResult<()> {
        Ok(())
    }

    /// Hand one encoded chunk to the channel. Must not block.
    fn deliver(&self, chunk: Vec<u8>) -> VoiceResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    /// The transport was stopped.
    Stopped,
    /// No channel, or the channel is not connected.
    Unavailable,
}

#[derive(Default)]
pub struct AudioChunkTransport {
    channel: RwLock<Option<Arc<dyn AudioChannel>>>,
    stopped: AtomicBool,
    drop_streak: AtomicU32,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl AudioChunkTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_channel(channel: Arc<dyn AudioChannel>) -> Self {
        let transport = Self::new();
        transport.set_channel(Some(channel));
        transport
    }

    pub fn set_channel(&self, channel: Option<Arc<dyn AudioChannel>>) {
        *self.channel.write().unwrap_or_else(PoisonError::into_inner) = channel;
    }

    /// Encode and forward one block of samples.
    pub async fn send(&self, samples: &[f32]) -> SendOutcome {
        if self.is_stopped() {
            return SendOutcome::Stopped;
        }
        let channel = self
            .channel
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(channel) = channel.filter(|c| c.is_connected()) else {
            self.record_drop("channel not connected");
            return SendOutcome::Unavailable;
        };

        let chunk = pcm::encode_pcm16_le(samples);
        if let Err(e) = channel.ready().await {
            self.record_drop(&e.to_string());
            return SendOutcome::Unavailable;
        }
        // stop() may have landed while we were waiting.
        if self.is_stopped() {
            return SendOutcome::Stopped;
        }
        match channel.deliver(chunk) {
            Ok(()) => {
                self.drop_streak.store(0, Ordering::Relaxed);
                self.sent.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Sent
            }
            Err(e) => {
                self.record_drop(&e.to_string());
                SendOutcome::Unavailable
            }
        }
    }

    /// Pump frames from `stream` into [`send`](Self::send) until the stream ends or the
    /// transport is stopped.
    pub fn attach(self: &Arc<Self>, mut stream: AudioStream) -> JoinHandle<()> {
        let transport = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(item) = stream.recv().await {
                match item {
                    Ok(frame) => {
                        if transport.send(&frame.samples).await == SendOutcome::Stopped {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "capture stream failed; transport detached");
                        break;
                    }
                }
            }
        })
    }

    /// No chunk reaches the channel after this returns, including one already in flight.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.drop_streak.store(0, Ordering::Relaxed);
        self.stopped.store(false, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn record_drop(&self, reason: &str) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        let streak = self.drop_streak.fetch_add(1, Ordering::Relaxed) + 1;
        if streak == SUSTAINED_DROP_CHUNKS {
            warn!(streak, reason, "audio channel unavailable; chunks are being dropped");
        } else {
            debug!(streak, reason, "audio chunk dropped");
        }
    }
}

/// Client side of a remote voice socket: binary PCM16 chunks out, [`SessionEvent`]s in.
pub struct WsAudioChannel {
    outbound: mpsc::UnboundedSender<Message>,
    connected: Arc<AtomicBool>,
}

impl WsAudioChannel {
    /// Connect and return the channel plus the stream of upstream notifications.
    pub async fn connect(url: &str) -> VoiceResult<(Arc<Self>, mpsc::UnboundedReceiver<SessionEvent>)> {
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut stream) = socket.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let writer_flag = Arc::clone(&connected);
        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    debug!(error = %e, "voice socket write failed");
                    break;
                }
            }
            writer_flag.store(false, Ordering::SeqCst);
        });

        let reader_flag = Arc::clone(&connected);
        tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                match msg {
                    Message::Text(text) => match serde_json::from_str::<SessionEvent>(&text) {
                        Ok(event) => {
                            if events_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "malformed upstream notification ignored"),
                    },
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            reader_flag.store(false, Ordering::SeqCst);
        });

        Ok((Arc::new(Self { outbound, connected }), events_rx))
    }

    pub fn send_command(&self, command: &ClientCommand) -> VoiceResult<()> {
        let json = serde_json::to_string(command).map_err(|e| VoiceError::ChannelSend(e.to_string()))?;
        self.outbound
            .send(Message::Text(json))
            .map_err(|_| VoiceError::ChannelUnavailable("voice socket closed".to_string()))
    }
}

impl AudioChannel for WsAudioChannel {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }

    fn deliver(&self, chunk: Vec<u8>) -> VoiceResult<()> {
        self.outbound
            .send(Message::Binary(chunk))
            .map_err(|_| VoiceError::ChannelUnavailable("voice socket closed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct RecordingChannel {
        connected: AtomicBool,
        gate: Option<Arc<Notify>>,
        delivered: Mutex<Vec<Vec<u8>>>,
    }

    #[async_trait]
    impl AudioChannel for RecordingChannel {
        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn ready(&self) -> VoiceResult<()> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(())
        }

        fn deliver(&self, chunk: Vec<u8>) -> VoiceResult<()> {
            self.delivered.lock().unwrap().push(chunk);
            Ok(())
        }
    }

    fn connected_channel(gate: Option<Arc<Notify>>) -> Arc<RecordingChannel> {
        Arc::new(RecordingChannel {
            connected: AtomicBool::new(true),
            gate,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn sends_pcm16_chunks_when_connected() {
        let channel = connected_channel(None);
        let transport = AudioChunkTransport::with_channel(channel.clone());
        assert_eq!(transport.send(&[1.0, -1.0, 0.0]).await, SendOutcome::Sent);
        let delivered = channel.delivered.lock().unwrap();
        assert_eq!(delivered[0], vec![0xFF, 0x7F, 0x00, 0x80, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn disconnected_channel_drops_without_buffering() {
        let channel = connected_channel(None);
        channel.connected.store(false, Ordering::SeqCst);
        let transport = AudioChunkTransport::with_channel(channel.clone());
        for _ in 0..3 {
            assert_eq!(transport.send(&[0.5]).await, SendOutcome::Unavailable);
        }
        channel.connected.store(true, Ordering::SeqCst);
        assert_eq!(transport.send(&[0.5]).await, SendOutcome::Sent);
        // Only the chunk sent while connected arrives; nothing was queued.
        assert_eq!(channel.delivered.lock().unwrap().len(), 1);
        assert_eq!(transport.dropped(), 3);

        let bare = AudioChunkTransport::new();
        assert_eq!(bare.send(&[0.5]).await, SendOutcome::Unavailable);
    }

    #[tokio::test]
    async fn stop_during_inflight_send_delivers_nothing() {
        let gate = Arc::new(Notify::new());
        let channel = connected_channel(Some(gate.clone()));
        let transport = Arc::new(AudioChunkTransport::with_channel(channel.clone()));

        let inflight = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move { transport.send(&[0.25; 8]).await })
        };
        tokio::task::yield_now().await;

        transport.stop();
        gate.notify_one();
        assert_eq!(inflight.await.unwrap(), SendOutcome::Stopped);
        assert_eq!(transport.send(&[0.25]).await, SendOutcome::Stopped);
        assert!(channel.delivered.lock().unwrap().is_empty());
    }
}
