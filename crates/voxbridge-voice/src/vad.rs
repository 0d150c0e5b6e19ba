//! Amplitude-threshold voice activity detection.
//!
//! Each frame's mean absolute amplitude (0–255) is compared to a fixed threshold.
//! Speech ends after a continuous quiet span of `silence_duration`; spans of speech
//! shorter than `min_speech_duration` are dropped as noise with no end event.
//! After a real end of speech a `SilenceTimeout` follows once `settle_delay` has passed.
//!
//! The detector is a pure state machine driven by explicit timestamps: [`AmplitudeVad::sample`]
//! per frame, [`AmplitudeVad::poll`] when [`AmplitudeVad::next_deadline`] passes with no frames.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use voxbridge_core::config::VadSettings;

/// Which caller the detector is tuned for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VadProfile {
    /// Low-latency turn-taking (500ms of silence ends speech).
    #[default]
    Conversational,
    /// Passive detection (2000ms of silence ends speech).
    Passive,
}

#[derive(Debug, Clone)]
pub struct VadConfig {
    pub silence_threshold_energy: f32,
    pub silence_duration: Duration,
    pub min_speech_duration: Duration,
    pub settle_delay: Duration,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self::conversational()
    }
}

impl VadConfig {
    pub fn conversational() -> Self {
        Self::from_settings(&VadSettings::default(), VadProfile::Conversational)
    }

    pub fn passive() -> Self {
        Self::from_settings(&VadSettings::default(), VadProfile::Passive)
    }

    pub fn from_settings(settings: &VadSettings, profile: VadProfile) -> Self {
        let silence_ms = match profile {
            VadProfile::Conversational => settings.silence_duration_ms,
            VadProfile::Passive => settings.passive_silence_duration_ms,
        };
        Self {
            silence_threshold_energy: settings.silence_threshold_energy,
            silence_duration: Duration::from_millis(silence_ms),
            min_speech_duration: Duration::from_millis(settings.min_speech_duration_ms),
            settle_delay: Duration::from_millis(settings.settle_delay_ms),
        }
    }
}

/// Per-stream detector state.
#[derive(Debug, Clone, Default)]
pub struct VadState {
    pub is_speaking: bool,
    pub speech_start_time: Option<Instant>,
    pub last_above_threshold_time: Option<Instant>,
    /// Start of the current quiet span while speaking (the silence clock).
    pub silence_since: Option<Instant>,
    settle_deadline: Option<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    SpeechStart,
    SpeechEnd { speech_duration: Duration },
    /// Speech ended before the minimum duration; no end event is emitted for it.
    NoiseSuppressed { speech_duration: Duration },
    SilenceTimeout,
}

#[derive(Debug)]
pub struct AmplitudeVad {
    config: VadConfig,
    state: VadState,
    stopped: bool,
}

impl AmplitudeVad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            state: VadState::default(),
            stopped: false,
        }
    }

    pub fn config(&self) -> &VadConfig {
        &self.config
    }

    pub fn state(&self) -> &VadState {
        &self.state
    }

    pub fn is_speaking(&self) -> bool {
        self.state.is_speaking
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Feed one frame's energy observed at `now`.
    pub fn sample(&mut self, energy: f32, now: Instant) -> Option<VadTransition> {
        if self.stopped {
            return None;
        }
        if energy > self.config.silence_threshold_energy {
            self.state.last_above_threshold_time = Some(now);
            self.state.silence_since = None;
            if !self.state.is_speaking {
                self.state.is_speaking = true;
                self.state.speech_start_time = Some(now);
                debug!(energy, "vad: speech start");
                return Some(VadTransition::SpeechStart);
            }
        } else if self.state.is_speaking && self.state.silence_since.is_none() {
            self.state.silence_since = Some(self.state.last_above_threshold_time.unwrap_or(now));
        }
        self.poll(now)
    }

    /// Fire whatever became due by `now`. Call repeatedly until it returns `None`.
    pub fn poll(&mut self, now: Instant) -> Option<VadTransition> {
        if self.stopped {
            return None;
        }
        if let Some(deadline) = self.state.settle_deadline {
            if now >= deadline {
                self.state.settle_deadline = None;
                return Some(VadTransition::SilenceTimeout);
            }
        }

        let since = self.state.silence_since?;
        if now.saturating_duration_since(since) < self.config.silence_duration {
            return None;
        }

        let start = self.state.speech_start_time.unwrap_or(since);
        let last = self.state.last_above_threshold_time.unwrap_or(since);
        let speech_duration = last.saturating_duration_since(start);
        self.state.is_speaking = false;
        self.state.speech_start_time = None;
        self.state.silence_since = None;

        if speech_duration >= self.config.min_speech_duration {
            self.state.settle_deadline = Some(now + self.config.settle_delay);
            debug!(?speech_duration, "vad: speech end");
            Some(VadTransition::SpeechEnd { speech_duration })
        } else {
            debug!(?speech_duration, "vad: burst below minimum speech duration, suppressed");
            Some(VadTransition::NoiseSuppressed { speech_duration })
        }
    }

    /// Earliest instant at which [`poll`](Self::poll) could fire without another frame.
    pub fn next_deadline(&self) -> Option<Instant> {
        if self.stopped {
            return None;
        }
        let silence = self
            .state
            .silence_since
            .map(|since| since + self.config.silence_duration);
        match (silence, self.state.settle_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Stop permanently. Nothing fires afterwards, including already scheduled timeouts.
    pub fn stop(&mut self) {
        self.stopped = true;
        self.state = VadState::default();
    }
}
