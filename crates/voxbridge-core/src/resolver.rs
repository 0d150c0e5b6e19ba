//! **ResponseResolver**: picks the canonical reply for one user utterance.
//!
//! The primary provider is tried first under a timeout. Its reply is rejected when it is
//! empty, errors, times out, or (on a continued conversation) is generic boilerplate. The
//! secondary provider then gets the local context window; if it fails too the turn is
//! recorded with a fixed apology. No provider error reaches the caller.
//!
//! Callers that speak the reply themselves can split a turn into [`ResponseResolver::propose`]
//! and [`ResponseResolver::commit`], attaching synthesized audio in between so the recorded
//! turn carries it.

use crate::config::{VoxConfig, DEFAULT_APOLOGY};
use crate::continuity::{ConversationContinuity, PendingTurn, DEFAULT_MAX_TURNS};
use crate::engagement::{EngagementCheck, PhraseDenyList};
use crate::error::ProviderError;
use crate::guard::TurnGuard;
use crate::providers::{PrimaryProvider, SecondaryProvider};
use crate::types::{AudioRef, ChatMessage, ResponseSource};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub primary_timeout: Duration,
    /// Turns of history handed to the secondary provider.
    pub context_turns: usize,
    pub apology: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            primary_timeout: Duration::from_secs(10),
            context_turns: DEFAULT_MAX_TURNS,
            apology: DEFAULT_APOLOGY.to_string(),
        }
    }
}

impl ResolverConfig {
    pub fn from_config(config: &VoxConfig) -> Self {
        Self {
            primary_timeout: config.primary.timeout(),
            context_turns: config.continuity.context_turns,
            apology: config.resolver.apology.clone(),
        }
    }
}

/// The canonical response for a turn, already recorded in continuity.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub text: String,
    pub audio_ref: Option<AudioRef>,
    pub provider_conversation_id: Option<String>,
    pub source: ResponseSource,
    pub turn_index: u64,
}

/// Result of a guarded resolve.
#[derive(Debug, Clone)]
pub enum TurnOutcome {
    Resolved(Resolution),
    /// The session moved on while the providers were working; nothing was recorded.
    Stale,
}

enum FallbackReason {
    Timeout(Duration),
    Failed(ProviderError),
    Empty,
    Generic,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::Timeout(d) => write!(f, "timed out after {:?}", d),
            FallbackReason::Failed(e) => write!(f, "{}", e),
            FallbackReason::Empty => write!(f, "empty reply"),
            FallbackReason::Generic => write!(f, "generic reply on continued conversation"),
        }
    }
}

/// A chosen reply that has not been recorded yet.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub text: String,
    pub audio: Option<AudioRef>,
    pub source: ResponseSource,
    conversation_id: Option<String>,
}

impl Candidate {
    pub fn with_audio(mut self, audio: AudioRef) -> Self {
        self.audio = Some(audio);
        self
    }
}

pub struct ResponseResolver {
    continuity: Arc<ConversationContinuity>,
    primary: Arc<dyn PrimaryProvider>,
    secondary: Arc<dyn SecondaryProvider>,
    engagement: Arc<dyn EngagementCheck>,
    config: ResolverConfig,
}

impl ResponseResolver {
    pub fn new(
        continuity: Arc<ConversationContinuity>,
        primary: Arc<dyn PrimaryProvider>,
        secondary: Arc<dyn SecondaryProvider>,
    ) -> Self {
        Self {
            continuity,
            primary,
            secondary,
            engagement: Arc::new(PhraseDenyList::default()),
            config: ResolverConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_engagement_check(mut self, check: Arc<dyn EngagementCheck>) -> Self {
        self.engagement = check;
        self
    }

    pub fn continuity(&self) -> &Arc<ConversationContinuity> {
        &self.continuity
    }

    /// Resolve and record a turn unconditionally.
    pub async fn resolve(&self, session_id: &str, utterance: &str) -> Resolution {
        let candidate = self.propose(session_id, utterance).await;
        let record = self
            .continuity
            .append_resolved(session_id, utterance, &candidate.text, candidate.audio.clone(), candidate.source);
        if candidate.source == ResponseSource::Primary {
            if let Some(id) = &candidate.conversation_id {
                self.continuity.set_provider_conversation_id(session_id, id.clone());
            }
        }
        self.resolution(session_id, candidate, record.turn_index)
    }

    /// Resolve, but record only if `guard` is still current once a reply is chosen.
    pub async fn resolve_guarded(&self, session_id: &str, utterance: &str, guard: &TurnGuard) -> TurnOutcome {
        let candidate = self.propose(session_id, utterance).await;
        self.commit(session_id, utterance, candidate, guard)
    }

    /// Record `candidate` unless `guard` moved on. Nothing is written for a stale turn.
    pub fn commit(&self, session_id: &str, utterance: &str, candidate: Candidate, guard: &TurnGuard) -> TurnOutcome {
        let turn = PendingTurn {
            user_text: utterance,
            assistant_text: &candidate.text,
            audio: candidate.audio.clone(),
            source: candidate.source,
            provider_conversation_id: match candidate.source {
                ResponseSource::Primary => candidate.conversation_id.clone(),
                _ => None,
            },
        };
        match self.continuity.commit(session_id, turn, guard) {
            Some(record) => TurnOutcome::Resolved(self.resolution(session_id, candidate, record.turn_index)),
            None => {
                debug!(session_id, generation = guard.generation(), "stale turn result discarded");
                TurnOutcome::Stale
            }
        }
    }

    /// Pick the reply for `utterance` without recording it.
    pub async fn propose(&self, session_id: &str, utterance: &str) -> Candidate {
        let prior_id = self.continuity.get_provider_conversation_id(session_id);
        let call = self.primary.converse(utterance, prior_id.as_deref());

        let reason = match tokio::time::timeout(self.config.primary_timeout, call).await {
            Err(_) => FallbackReason::Timeout(self.config.primary_timeout),
            Ok(Err(e)) => FallbackReason::Failed(e),
            Ok(Ok(reply)) => {
                let text = reply.text.trim();
                if text.is_empty() {
                    FallbackReason::Empty
                } else if prior_id.is_some() && self.engagement.is_generic(text) {
                    FallbackReason::Generic
                } else {
                    return Candidate {
                        text: text.to_string(),
                        audio: reply.audio,
                        source: ResponseSource::Primary,
                        conversation_id: reply.conversation_id.or(prior_id),
                    };
                }
            }
        };
        info!(session_id, reason = %reason, "primary reply rejected, using secondary provider");

        let messages = self.secondary_messages(session_id, utterance);
        match self.secondary.chat(&messages).await {
            Ok(text) if !text.trim().is_empty() => Candidate {
                text: text.trim().to_string(),
                audio: None,
                source: ResponseSource::Secondary,
                conversation_id: None,
            },
            Ok(_) => self.apology(session_id, "empty reply"),
            Err(e) => self.apology(session_id, &e.to_string()),
        }
    }

    fn secondary_messages(&self, session_id: &str, utterance: &str) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(scenario) = self.continuity.scenario(session_id) {
            messages.push(ChatMessage::system(format!("Scenario: {}", scenario)));
        }
        messages.extend(
            self.continuity
                .get_context_window(session_id, self.config.context_turns),
        );
        messages.push(ChatMessage::user(utterance));
        messages
    }

    fn apology(&self, session_id: &str, cause: &str) -> Candidate {
        error!(session_id, cause, "both providers failed; answering with apology");
        Candidate {
            text: self.config.apology.clone(),
            audio: None,
            source: ResponseSource::Apology,
            conversation_id: None,
        }
    }

    fn resolution(&self, session_id: &str, candidate: Candidate, turn_index: u64) -> Resolution {
        debug!(session_id, turn_index, source = ?candidate.source, "turn recorded");
        Resolution {
            text: candidate.text,
            audio_ref: candidate.audio,
            provider_conversation_id: self.continuity.get_provider_conversation_id(session_id),
            source: candidate.source,
            turn_index,
        }
    }
}
