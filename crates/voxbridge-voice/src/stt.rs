//! **Speech-to-Text**: turn a sealed [`Utterance`] into text for the resolver.

use crate::audio::Utterance;
use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use voxbridge_core::config::SpeechConfig;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe one utterance. Returns an empty string when nothing was said.
    async fn transcribe(&self, utterance: &Utterance) -> VoiceResult<String>;
}

/// Returns a fixed transcript for every utterance.
#[derive(Debug, Clone, Default)]
pub struct StaticTranscriber {
    pub text: String,
}

impl StaticTranscriber {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

#[async_trait]
impl Transcriber for StaticTranscriber {
    async fn transcribe(&self, _utterance: &Utterance) -> VoiceResult<String> {
        Ok(self.text.clone())
    }
}

#[derive(Deserialize)]
struct TranscriptionResponse {
    #[serde(default)]
    text: String,
}

/// OpenAI-compatible `/audio/transcriptions` client. The utterance is uploaded as WAV.
#[derive(Debug, Clone)]
pub struct HttpTranscriber {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

impl HttpTranscriber {
    pub fn from_config(config: &SpeechConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.stt_model.clone(),
            client,
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, utterance: &Utterance) -> VoiceResult<String> {
        if utterance.is_empty() {
            return Ok(String::new());
        }
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| VoiceError::Config("speech.api_key is not set".to_string()))?;

        let part = reqwest::multipart::Part::bytes(utterance.to_wav())
            .file_name("utterance.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone());

        let res = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Stt(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(VoiceError::Stt(format!("STT API error {}: {}", status, body)));
        }
        let parsed: TranscriptionResponse = res.json().await.map_err(|e| VoiceError::Stt(e.to_string()))?;
        Ok(parsed.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tokio::time::Instant;

    fn utterance(chunks: Vec<Vec<u8>>) -> Utterance {
        let now = Instant::now();
        Utterance {
            started_at: now,
            ended_at: now,
            recorded_at: Utc::now(),
            chunks,
            sample_rate: 16_000,
        }
    }

    #[tokio::test]
    async fn static_transcriber_echoes_text() {
        let stt = StaticTranscriber::new("what's the weather?");
        assert_eq!(stt.transcribe(&utterance(vec![vec![0, 0]])).await.unwrap(), "what's the weather?");
    }

    #[tokio::test]
    async fn http_transcriber_skips_empty_and_needs_key() {
        let stt = HttpTranscriber::from_config(&SpeechConfig::default());
        assert_eq!(stt.transcribe(&utterance(vec![])).await.unwrap(), "");
        let err = stt.transcribe(&utterance(vec![vec![1, 2]])).await.unwrap_err();
        assert!(matches!(err, VoiceError::Config(_)));
    }
}
