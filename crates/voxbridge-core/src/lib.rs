//! voxbridge core library.
//! Conversation continuity, response resolution and the provider clients behind it.

pub mod config;
pub mod continuity;
pub mod engagement;
pub mod error;
pub mod guard;
pub mod providers;
pub mod resolver;
pub mod transcript_log;
pub mod types;

pub use config::VoxConfig;
pub use continuity::{ConversationContinuity, PendingTurn, DEFAULT_MAX_TURNS};
pub use engagement::{EngagementCheck, PhraseDenyList};
pub use error::{CoreError, CoreResult, ProviderError, ProviderResult};
pub use guard::{TurnGeneration, TurnGuard};
pub use providers::{
    AgentSocketProvider, ChatCompletionsProvider, PrimaryProvider, PrimaryReply, SecondaryProvider,
    SignedUrlClient,
};
pub use resolver::{Candidate, Resolution, ResolverConfig, ResponseResolver, TurnOutcome};
pub use transcript_log::TranscriptLog;
pub use types::{AudioRef, ChatMessage, ConversationSession, ResponseSource, Role, TurnRecord};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
