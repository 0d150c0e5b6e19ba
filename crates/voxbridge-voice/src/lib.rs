//! # voxbridge voice
//!
//! Turn-taking for voice conversations: microphone (or pushed) audio in, amplitude VAD,
//! transcription, response resolution through `voxbridge-core`, and spoken output.
//!
//! ```text
//! AudioSource → AmplitudeVad → Utterance → Transcriber → ResponseResolver
//!      │                                                        │
//!      └→ AudioChunkTransport (PCM16 chunks)       SpeechSynthesizer → PlaybackSink
//! ```
//!
//! Each connection runs one [`TurnSession`]; its [`SessionEvent`]s are the only upward channel.

pub mod audio;
pub mod error;
pub mod events;
pub mod pcm;
pub mod registry;
pub mod retry;
pub mod stt;
pub mod transport;
pub mod turn;
pub mod vad;
pub mod voice_output;

pub use audio::{AudioFrame, AudioSource, AudioStream, PushAudioSource, Utterance};
#[cfg(feature = "device")]
pub use audio::CpalSource;
pub use error::{VoiceError, VoiceResult};
pub use events::{ClientCommand, Mode, SessionEvent};
pub use registry::SessionRegistry;
pub use retry::RetryPolicy;
pub use stt::{HttpTranscriber, StaticTranscriber, Transcriber};
pub use transport::{AudioChannel, AudioChunkTransport, SendOutcome, WsAudioChannel};
pub use turn::{TurnConfig, TurnDeps, TurnSession, TurnSessionHandle, TurnState};
pub use vad::{AmplitudeVad, VadConfig, VadProfile, VadState, VadTransition};
#[cfg(feature = "device")]
pub use voice_output::DevicePlayback;
pub use voice_output::{HttpSynthesizer, NullPlayback, PlaybackSink, SilentSynthesizer, SpeechSynthesizer};
