//! Wire-level session notifications and client commands (JSON, tagged by `type`).

use crate::vad::VadProfile;
use serde::{Deserialize, Serialize};
use voxbridge_core::{AudioRef, ResponseSource};

/// What the user should be doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Listening,
    Speaking,
}

/// Everything a turn session reports upward, in order, on one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    Mode {
        mode: Mode,
    },
    SpeechDetected,
    ProcessingAudio,
    Transcript {
        text: String,
        is_final: bool,
    },
    TurnComplete {
        user_text: String,
        assistant_text: String,
        audio_ref: Option<AudioRef>,
        source: ResponseSource,
        turn_index: u64,
    },
    Error {
        reason: String,
    },
}

/// Commands a client sends over the voice socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    Start {
        #[serde(default)]
        detection: VadProfile,
    },
    Stop,
    Clear,
    /// The client finished playing the last response audio.
    PlaybackFinished,
}
