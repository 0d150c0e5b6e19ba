//! Response providers.
//!
//! - [`PrimaryProvider`]: stateful, low-latency agent that keeps its own memory keyed by a
//!   provider-issued conversation id ([`AgentSocketProvider`]).
//! - [`SecondaryProvider`]: stateless chat model that receives the whole context window on
//!   every call ([`ChatCompletionsProvider`]).

mod agent_socket;
mod chat;
mod signed_url;

pub use agent_socket::{AgentEvent, AgentSocketProvider, ClientFrame, ReplyCollector, Step};
pub use chat::ChatCompletionsProvider;
pub use signed_url::SignedUrlClient;

use crate::error::ProviderResult;
use crate::types::{AudioRef, ChatMessage};
use async_trait::async_trait;

/// Reply from the primary provider for one user message.
#[derive(Debug, Clone, Default)]
pub struct PrimaryReply {
    pub text: String,
    pub audio: Option<AudioRef>,
    /// Conversation id the provider associated with this exchange, if it reported one.
    pub conversation_id: Option<String>,
}

#[async_trait]
pub trait PrimaryProvider: Send + Sync {
    /// Send one user message, continuing `conversation_id` when given.
    async fn converse(&self, text: &str, conversation_id: Option<&str>) -> ProviderResult<PrimaryReply>;
}

#[async_trait]
pub trait SecondaryProvider: Send + Sync {
    /// Reply to an ordered list of role-tagged messages; the last one is the new utterance.
    async fn chat(&self, messages: &[ChatMessage]) -> ProviderResult<String>;
}
