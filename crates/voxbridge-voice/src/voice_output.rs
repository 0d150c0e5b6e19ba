//! **Voice output**: text-to-speech synthesis and playback sinks.
//!
//! A [`PlaybackSink`] plays one response to completion and reports back; the turn
//! session only leaves `Playing` once `play` returns. `stop()` cuts playback short.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;
use voxbridge_core::config::SpeechConfig;
use voxbridge_core::AudioRef;

pub const SPEECH_MIME: &str = "audio/mpeg";

/// Turns reply text into playable audio.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// `None` means there is nothing to play.
    async fn synthesize(&self, text: &str) -> VoiceResult<Option<AudioRef>>;
}

/// Produces no audio; turns go straight from response to idle.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSynthesizer;

#[async_trait]
impl SpeechSynthesizer for SilentSynthesizer {
    async fn synthesize(&self, _text: &str) -> VoiceResult<Option<AudioRef>> {
        Ok(None)
    }
}

/// OpenAI-compatible `/audio/speech` client.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    base_url: String,
    api_key: Option<String>,
    model: String,
    voice: String,
    client: reqwest::Client,
}

impl HttpSynthesizer {
    pub fn from_config(config: &SpeechConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.tts_model.clone(),
            voice: config.voice.clone(),
            client,
        }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str) -> VoiceResult<Option<AudioRef>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| VoiceError::Config("speech.api_key is not set".to_string()))?;
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
        });
        let res = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
        }
        let bytes = res.bytes().await.map_err(|e| VoiceError::Tts(e.to_string()))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(AudioRef::new(bytes.to_vec(), SPEECH_MIME)))
    }
}

/// Plays response audio to completion.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Resolves once the audio finished playing (or was stopped).
    async fn play(&self, audio: &AudioRef) -> VoiceResult<()>;

    /// Cut the current playback short.
    fn stop(&self) {}
}

/// Discards audio and reports completion immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPlayback;

#[async_trait]
impl PlaybackSink for NullPlayback {
    async fn play(&self, audio: &AudioRef) -> VoiceResult<()> {
        debug!(id = %audio.id, bytes = audio.len(), "playback discarded");
        Ok(())
    }
}

#[cfg(feature = "device")]
pub use device::DevicePlayback;

#[cfg(feature = "device")]
mod device {
    use super::*;
    use crate::pcm;
    use rodio::{OutputStream, Sink, Source};
    use std::io::Cursor;
    use std::sync::{Arc, Mutex, PoisonError};
    use tracing::info;

    /// Default output device via Rodio. Each `play` opens the device on a blocking thread
    /// (the output stream is `!Send`) and waits for the queue to drain.
    #[derive(Default)]
    pub struct DevicePlayback {
        current: Arc<Mutex<Option<Arc<Sink>>>>,
    }

    impl DevicePlayback {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl PlaybackSink for DevicePlayback {
        async fn play(&self, audio: &AudioRef) -> VoiceResult<()> {
            if audio.is_empty() {
                return Ok(());
            }
            let audio = audio.clone();
            let current = Arc::clone(&self.current);
            tokio::task::spawn_blocking(move || -> VoiceResult<()> {
                let (_stream, handle) =
                    OutputStream::try_default().map_err(|e| VoiceError::Playback(e.to_string()))?;
                let sink = Arc::new(Sink::try_new(&handle).map_err(|e| VoiceError::Playback(e.to_string()))?);

                if let Some(rate) = pcm_rate(&audio.mime) {
                    let samples = pcm::decode_pcm16_le(audio.bytes());
                    sink.append(rodio::buffer::SamplesBuffer::new(1, rate, samples));
                } else {
                    let source = rodio::Decoder::new(Cursor::new(audio.bytes().to_vec()))
                        .map_err(|e| VoiceError::Playback(format!("Decode failed: {}", e)))?;
                    sink.append(source.convert_samples::<f32>());
                }

                *current.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&sink));
                sink.sleep_until_end();
                current.lock().unwrap_or_else(PoisonError::into_inner).take();
                Ok(())
            })
            .await
            .map_err(|e| VoiceError::Playback(e.to_string()))?
        }

        fn stop(&self) {
            if let Some(sink) = self.current.lock().unwrap_or_else(PoisonError::into_inner).take() {
                sink.stop();
                info!("playback stopped");
            }
        }
    }

    /// Sample rate of a raw `audio/pcm;rate=N` payload.
    fn pcm_rate(mime: &str) -> Option<u32> {
        let rest = mime.strip_prefix("audio/pcm")?;
        Some(
            rest.split(';')
                .find_map(|p| p.trim().strip_prefix("rate=")?.parse().ok())
                .unwrap_or(16_000),
        )
    }
}
