//! voxbridge configuration.
//!
//! Layered with the `config` crate, lowest precedence first:
//! built-in defaults, then an optional TOML file, then `VOXBRIDGE__*` environment variables.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | VOXBRIDGE_CONFIG | config/voxbridge.toml | Path of the TOML file (skipped when missing). |
//! | VOXBRIDGE__SERVER__PORT | 3000 | Gateway port. |
//! | VOXBRIDGE__PRIMARY__AGENT_ID | unset | Conversational agent id for signed sessions. |
//! | VOXBRIDGE__PRIMARY__API_KEY | unset | Falls back to `AGENT_API_KEY`. |
//! | VOXBRIDGE__SECONDARY__API_KEY | unset | Falls back to `OPENAI_API_KEY`. |
//! | VOXBRIDGE__SPEECH__API_KEY | unset | Falls back to `OPENAI_API_KEY`. |
//! | VOXBRIDGE__CONTINUITY__TRANSCRIPT_PATH | unset | Sled transcript log directory. |

use crate::continuity::DEFAULT_MAX_TURNS;
use crate::engagement::DEFAULT_GENERIC_PHRASES;
use crate::error::CoreResult;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/voxbridge.toml";
pub const DEFAULT_APOLOGY: &str =
    "I'm sorry, I'm having trouble answering right now. Could you say that again?";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxConfig {
    pub server: ServerConfig,
    pub vad: VadSettings,
    pub primary: PrimaryConfig,
    pub secondary: SecondaryConfig,
    pub speech: SpeechConfig,
    pub continuity: ContinuityConfig,
    pub resolver: ResolverSettings,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory for daily-rolling log files; stdout only when unset.
    pub log_dir: Option<String>,
    /// Restart capture automatically after each completed turn.
    pub continuous: bool,
    /// How long the gateway waits for a client to report playback finished.
    pub playback_ack_timeout_ms: u64,
    /// Sample rate of PCM frames sent by browser clients.
    pub client_sample_rate: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            log_dir: None,
            continuous: true,
            playback_ack_timeout_ms: 30_000,
            client_sample_rate: 16_000,
        }
    }
}

/// Amplitude VAD tuning. Energy is on a 0–255 scale.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    pub silence_threshold_energy: f32,
    /// Quiet time that ends an utterance during conversational turn-taking.
    pub silence_duration_ms: u64,
    /// Quiet time used by passive (non-conversational) detection.
    pub passive_silence_duration_ms: u64,
    pub min_speech_duration_ms: u64,
    pub settle_delay_ms: u64,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            silence_threshold_energy: 30.0,
            silence_duration_ms: 500,
            passive_silence_duration_ms: 2000,
            min_speech_duration_ms: 500,
            settle_delay_ms: 100,
        }
    }
}

/// Stateful conversational agent reached through a signed WebSocket URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrimaryConfig {
    pub api_base: String,
    pub signed_url_path: String,
    pub api_key_header: String,
    pub api_key: Option<String>,
    pub agent_id: Option<String>,
    pub timeout_ms: u64,
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.elevenlabs.io".to_string(),
            signed_url_path: "/v1/convai/conversation/get_signed_url".to_string(),
            api_key_header: "xi-api-key".to_string(),
            api_key: None,
            agent_id: None,
            timeout_ms: 10_000,
        }
    }
}

impl PrimaryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Stateless OpenAI-compatible chat completions fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecondaryConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    pub system_prompt: Option<String>,
    /// Request timeout; the HTTP client default applies when unset.
    pub timeout_ms: Option<u64>,
}

impl Default for SecondaryConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            system_prompt: Some(
                "You are a friendly voice assistant. Answer in one to three short spoken sentences \
                 and continue the conversation using everything said so far."
                    .to_string(),
            ),
            timeout_ms: None,
        }
    }
}

/// Speech-to-text and text-to-speech endpoints (OpenAI-compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub stt_model: String,
    pub tts_model: String,
    pub voice: String,
    pub timeout_ms: u64,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: None,
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContinuityConfig {
    pub max_turns: usize,
    /// Turns handed to the secondary provider as context.
    pub context_turns: usize,
    pub transcript_path: Option<String>,
}

impl Default for ContinuityConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            context_turns: DEFAULT_MAX_TURNS,
            transcript_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverSettings {
    pub generic_phrases: Vec<String>,
    pub apology: String,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            generic_phrases: DEFAULT_GENERIC_PHRASES.iter().map(|s| s.to_string()).collect(),
            apology: DEFAULT_APOLOGY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 2_000,
        }
    }
}

impl VoxConfig {
    /// Load from `VOXBRIDGE_CONFIG` (or the default path) and the environment.
    pub fn load() -> CoreResult<Self> {
        let path = std::env::var("VOXBRIDGE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(Path::new(&path))
    }

    /// Load with an explicit file path. A missing file is skipped, not an error.
    pub fn load_from_path(path: &Path) -> CoreResult<Self> {
        let builder = config::Config::builder();
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("VOXBRIDGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: VoxConfig = built.try_deserialize()?;
        cfg.apply_env_fallbacks();
        Ok(cfg)
    }

    /// Parse a TOML document on top of the defaults (no environment).
    pub fn from_toml_str(s: &str) -> CoreResult<Self> {
        let built = config::Config::builder()
            .add_source(config::File::from_str(s, config::FileFormat::Toml))
            .build()?;
        Ok(built.try_deserialize()?)
    }

    /// Conventional provider key variables fill keys left unset.
    fn apply_env_fallbacks(&mut self) {
        if self.primary.api_key.is_none() {
            self.primary.api_key = env_opt_string("AGENT_API_KEY");
        }
        if self.primary.agent_id.is_none() {
            self.primary.agent_id = env_opt_string("AGENT_ID");
        }
        if self.secondary.api_key.is_none() {
            self.secondary.api_key = env_opt_string("OPENAI_API_KEY");
        }
        if self.speech.api_key.is_none() {
            self.speech.api_key = env_opt_string("OPENAI_API_KEY");
        }
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = VoxConfig::default();
        assert_eq!(cfg.vad.silence_threshold_energy, 30.0);
        assert_eq!(cfg.vad.silence_duration_ms, 500);
        assert_eq!(cfg.vad.passive_silence_duration_ms, 2000);
        assert_eq!(cfg.vad.min_speech_duration_ms, 500);
        assert_eq!(cfg.primary.timeout(), Duration::from_secs(10));
        assert_eq!(cfg.continuity.max_turns, 10);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert!(!cfg.resolver.generic_phrases.is_empty());
    }

    #[test]
    fn toml_overrides_single_fields() {
        let cfg = VoxConfig::from_toml_str(
            r#"
            [server]
            port = 8080

            [vad]
            silence_duration_ms = 750

            [resolver]
            generic_phrases = ["Hi!"]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.server.host, "127.0.0.1");
        assert_eq!(cfg.vad.silence_duration_ms, 750);
        assert_eq!(cfg.vad.min_speech_duration_ms, 500);
        assert_eq!(cfg.resolver.generic_phrases, vec!["Hi!".to_string()]);
        assert_eq!(cfg.resolver.apology, DEFAULT_APOLOGY);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = VoxConfig::load_from_path(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.continuity.context_turns, 10);
    }
}
