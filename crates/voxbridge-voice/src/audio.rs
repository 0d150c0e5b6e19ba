//! Audio sources: the live sample streams the VAD and the chunk transport consume.
//!
//! [`PushAudioSource`] is fed from outside (e.g. PCM frames arriving on a socket).
//! With the `device` feature, [`CpalSource`] captures the default microphone.

use crate::error::{VoiceError, VoiceResult};
use crate::pcm;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Frames buffered between a source and its consumer before new frames are dropped.
const STREAM_CAPACITY: usize = 256;

/// One block of captured samples.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Mono samples, normalized to -1.0..1.0
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub captured_at: Instant,
}

impl AudioFrame {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            captured_at: Instant::now(),
        }
    }
}

/// One bounded span of detected speech, as the PCM16 chunks captured during it.
/// Consumed once by transcription, then dropped.
#[derive(Debug, Clone)]
pub struct Utterance {
    pub started_at: Instant,
    pub ended_at: Instant,
    pub recorded_at: DateTime<Utc>,
    pub chunks: Vec<Vec<u8>>,
    pub sample_rate: u32,
}

impl Utterance {
    pub fn duration(&self) -> Duration {
        self.ended_at.saturating_duration_since(self.started_at)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(|c| c.is_empty())
    }

    /// All chunks joined in capture order.
    pub fn pcm(&self) -> Vec<u8> {
        self.chunks.concat()
    }

    pub fn to_wav(&self) -> Vec<u8> {
        pcm::pcm16_to_wav(&self.pcm(), self.sample_rate)
    }
}

/// A live stream of frames. An `Err` item means the stream failed mid-capture;
/// `None` means it ended. Dropping the stream releases the underlying device.
pub struct AudioStream {
    frames: mpsc::Receiver<VoiceResult<AudioFrame>>,
    _keepalive: Option<Box<dyn Send>>,
}

impl AudioStream {
    pub fn new(frames: mpsc::Receiver<VoiceResult<AudioFrame>>) -> Self {
        Self { frames, _keepalive: None }
    }

    /// Keep `guard` alive for as long as the stream is.
    pub fn with_keepalive(mut self, guard: impl Send + 'static) -> Self {
        self._keepalive = Some(Box::new(guard));
        self
    }

    pub async fn recv(&mut self) -> Option<VoiceResult<AudioFrame>> {
        self.frames.recv().await
    }
}

/// Something that can open a live audio stream.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Acquire the stream. Permission and device failures are returned here, synchronously
    /// to the caller of `start()`.
    async fn open(&self) -> VoiceResult<AudioStream>;
}

/// Source fed by [`PushAudioSource::push`]. Only the most recently opened stream receives frames;
/// frames pushed while no stream is open are dropped.
#[derive(Clone)]
pub struct PushAudioSource {
    inner: Arc<Mutex<Option<mpsc::Sender<VoiceResult<AudioFrame>>>>>,
    sample_rate: u32,
}

impl PushAudioSource {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Offer samples to the open stream. Returns whether they were accepted.
    pub fn push(&self, samples: Vec<f32>) -> bool {
        self.offer(Ok(AudioFrame::new(samples, self.sample_rate)))
    }

    /// Fail the open stream, as a device error would.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.offer(Err(VoiceError::AudioStream(reason.into())))
    }

    /// End the open stream.
    pub fn close(&self) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|tx| !tx.is_closed())
    }

    fn offer(&self, item: VoiceResult<AudioFrame>) -> bool {
        let mut slot = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = slot.as_ref() else {
            return false;
        };
        match tx.try_send(item) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("audio stream backlog full; frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                slot.take();
                false
            }
        }
    }
}

#[async_trait]
impl AudioSource for PushAudioSource {
    async fn open(&self) -> VoiceResult<AudioStream> {
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        Ok(AudioStream::new(rx))
    }
}

#[cfg(feature = "device")]
pub use device::CpalSource;

#[cfg(feature = "device")]
mod device {
    use super::*;
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{BufferSize, SampleRate, StreamConfig};
    use std::thread;
    use tokio::sync::oneshot;
    use tracing::{info, warn};

    /// Default microphone via CPAL. The cpal stream lives on its own thread because it is
    /// `!Send` on some platforms; dropping the [`AudioStream`] ends that thread.
    #[derive(Debug, Clone)]
    pub struct CpalSource {
        pub sample_rate: u32,
        /// Samples per frame (default 480 = 30ms at 16kHz)
        pub frame_size: usize,
    }

    impl Default for CpalSource {
        fn default() -> Self {
            Self {
                sample_rate: 16_000,
                frame_size: 480,
            }
        }
    }

    impl CpalSource {
        pub fn list_input_devices() -> VoiceResult<Vec<String>> {
            let host = cpal::default_host();
            Ok(host.input_devices()?.filter_map(|d| d.name().ok()).collect())
        }
    }

    #[async_trait]
    impl AudioSource for CpalSource {
        async fn open(&self) -> VoiceResult<AudioStream> {
            let (frame_tx, frame_rx) = mpsc::channel(STREAM_CAPACITY);
            let (ready_tx, ready_rx) = oneshot::channel::<VoiceResult<()>>();
            let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
            let sample_rate = self.sample_rate;
            let frame_size = self.frame_size;

            thread::spawn(move || {
                let built = (|| -> VoiceResult<cpal::Stream> {
                    let device = cpal::default_host()
                        .default_input_device()
                        .ok_or_else(|| VoiceError::PermissionDenied("no input device available".to_string()))?;
                    info!(device = %device.name().unwrap_or_else(|_| "unknown".to_string()), "opening microphone");
                    device.default_input_config()?;

                    let config = StreamConfig {
                        channels: 1,
                        sample_rate: SampleRate(sample_rate),
                        buffer_size: BufferSize::Default,
                    };
                    let data_tx = frame_tx.clone();
                    let mut pending = Vec::with_capacity(frame_size);
                    let stream = device.build_input_stream(
                        &config,
                        move |data: &[f32], _: &cpal::InputCallbackInfo| {
                            for &sample in data {
                                pending.push(sample);
                                if pending.len() >= frame_size {
                                    let frame = AudioFrame::new(std::mem::take(&mut pending), sample_rate);
                                    let _ = data_tx.try_send(Ok(frame));
                                }
                            }
                        },
                        move |err| {
                            warn!(error = %err, "microphone stream error");
                            let _ = frame_tx.try_send(Err(VoiceError::AudioStream(err.to_string())));
                        },
                        None,
                    )?;
                    stream.play()?;
                    Ok(stream)
                })();

                match built {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        // Blocks until the AudioStream (holding stop_tx) is dropped.
                        let _ = stop_rx.recv();
                        drop(stream);
                        debug!("microphone released");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            });

            ready_rx
                .await
                .map_err(|_| VoiceError::AudioDevice("capture thread exited".to_string()))??;
            Ok(AudioStream::new(frame_rx).with_keepalive(stop_tx))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_reaches_only_open_stream() {
        let source = PushAudioSource::new(16_000);
        assert!(!source.push(vec![0.1; 4]));

        let mut stream = source.open().await.unwrap();
        assert!(source.is_open());
        assert!(source.push(vec![0.1; 4]));
        let frame = stream.recv().await.unwrap().unwrap();
        assert_eq!(frame.samples.len(), 4);
        assert_eq!(frame.sample_rate, 16_000);

        drop(stream);
        assert!(!source.push(vec![0.1; 4]));
        assert!(!source.is_open());
    }

    #[tokio::test]
    async fn fail_and_close_surface_on_stream() {
        let source = PushAudioSource::new(16_000);
        let mut stream = source.open().await.unwrap();
        assert!(source.fail("unplugged"));
        assert!(matches!(stream.recv().await, Some(Err(VoiceError::AudioStream(_)))));
        source.close();
        assert!(stream.recv().await.is_none());
    }
}
