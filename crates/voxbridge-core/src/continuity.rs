//! **ConversationContinuity**: per-session turn history and provider conversation ids.
//!
//! Sessions live in a `DashMap`, so every mutation of one session (append + evict,
//! provider id update) happens under that key's shard lock and is atomic per key.
//! Different sessions never contend on a shared lock.
//!
//! A live connection attaches to its session with an owner id. Teardown only destroys the
//! session while that connection is still the owner, so a newer connection that took the
//! same session id over keeps its history.

use crate::config::ContinuityConfig;
use crate::error::CoreResult;
use crate::guard::TurnGuard;
use crate::transcript_log::TranscriptLog;
use crate::types::{AudioRef, ChatMessage, ConversationSession, ResponseSource, TurnRecord};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Maximum number of turns kept per session (5 user/assistant exchanges each way).
pub const DEFAULT_MAX_TURNS: usize = 10;

/// A resolved reply waiting to be recorded.
#[derive(Debug, Clone)]
pub struct PendingTurn<'a> {
    pub user_text: &'a str,
    pub assistant_text: &'a str,
    pub audio: Option<AudioRef>,
    pub source: ResponseSource,
    /// Replaces the stored provider conversation id when set.
    pub provider_conversation_id: Option<String>,
}

pub struct ConversationContinuity {
    sessions: DashMap<String, ConversationSession>,
    /// Connection currently attached to each session. Lock order: `owners` before `sessions`.
    owners: DashMap<String, Uuid>,
    max_turns: usize,
    log: Option<Arc<TranscriptLog>>,
}

impl Default for ConversationContinuity {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

impl ConversationContinuity {
    pub fn new(max_turns: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            owners: DashMap::new(),
            max_turns: max_turns.max(1),
            log: None,
        }
    }

    /// Build from configuration, opening the transcript log when a path is set.
    pub fn from_config(config: &ContinuityConfig) -> CoreResult<Self> {
        let store = Self::new(config.max_turns);
        match config.transcript_path.as_deref() {
            Some(path) => Ok(store.with_transcript_log(Arc::new(TranscriptLog::open(path)?))),
            None => Ok(store),
        }
    }

    pub fn with_transcript_log(mut self, log: Arc<TranscriptLog>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    /// Create the session if it does not exist yet.
    pub fn ensure_session(&self, session_id: &str) {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id, "conversation session created");
                ConversationSession::new(session_id)
            });
    }

    /// Make `owner` the live connection for a session, creating the session if needed.
    pub fn attach(&self, session_id: &str, owner: Uuid) {
        if let Some(previous) = self.owners.insert(session_id.to_string(), owner) {
            debug!(session_id, %previous, %owner, "conversation taken over by a new connection");
        }
        self.ensure_session(session_id);
    }

    /// Destroy the session if `owner` is still attached to it. Returns whether it was destroyed.
    pub fn detach(&self, session_id: &str, owner: Uuid) -> bool {
        match self.owners.entry(session_id.to_string()) {
            Entry::Occupied(entry) if *entry.get() == owner => {
                self.clear(session_id);
                entry.remove();
                true
            }
            _ => {
                debug!(session_id, %owner, "detach skipped: session owned by another connection");
                false
            }
        }
    }

    /// Empty the session's history if `owner` is still attached to it.
    pub fn reset(&self, session_id: &str, owner: Uuid) -> bool {
        match self.owners.entry(session_id.to_string()) {
            Entry::Occupied(entry) if *entry.get() == owner => {
                self.clear(session_id);
                self.ensure_session(session_id);
                true
            }
            _ => false,
        }
    }

    /// Record a turn only if `guard` is still current. The guard is checked under the
    /// session's entry lock.
    pub fn commit(&self, session_id: &str, turn: PendingTurn<'_>, guard: &TurnGuard) -> Option<TurnRecord> {
        let record = {
            let entry = self.sessions.entry(session_id.to_string());
            if !guard.is_current() {
                return None;
            }
            let mut session = entry.or_insert_with(|| ConversationSession::new(session_id));
            if let Some(id) = turn.provider_conversation_id {
                session.provider_conversation_id = Some(id);
            }
            session.push_turn(turn.user_text, turn.assistant_text, turn.audio, turn.source, self.max_turns)
        };
        self.log_record(session_id, &record);
        Some(record)
    }

    /// Append a text-only turn.
    pub fn append_turn(&self, session_id: &str, user_text: &str, assistant_text: &str) -> TurnRecord {
        self.append_resolved(session_id, user_text, assistant_text, None, ResponseSource::Primary)
    }

    /// Append a turn with its response audio and the path that produced it.
    pub fn append_resolved(
        &self,
        session_id: &str,
        user_text: &str,
        assistant_text: &str,
        audio: Option<AudioRef>,
        source: ResponseSource,
    ) -> TurnRecord {
        let record = {
            let mut session = self
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(|| ConversationSession::new(session_id));
            session.push_turn(user_text, assistant_text, audio, source, self.max_turns)
        };
        self.log_record(session_id, &record);
        record
    }

    fn log_record(&self, session_id: &str, record: &TurnRecord) {
        if let Some(log) = &self.log {
            if let Err(e) = log.append(session_id, record) {
                warn!(session_id, error = %e, "transcript log append failed");
            }
        }
    }

    /// The most recent `max_turns` turns as alternating user/assistant messages.
    pub fn get_context_window(&self, session_id: &str, max_turns: usize) -> Vec<ChatMessage> {
        self.sessions
            .get(session_id)
            .map(|s| s.context_window(max_turns))
            .unwrap_or_default()
    }

    pub fn get_provider_conversation_id(&self, session_id: &str) -> Option<String> {
        self.sessions
            .get(session_id)
            .and_then(|s| s.provider_conversation_id.clone())
    }

    pub fn set_provider_conversation_id(&self, session_id: &str, conversation_id: impl Into<String>) {
        let mut session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| ConversationSession::new(session_id));
        session.provider_conversation_id = Some(conversation_id.into());
    }

    pub fn scenario(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).and_then(|s| s.scenario.clone())
    }

    pub fn set_scenario(&self, session_id: &str, scenario: Option<String>) {
        let mut session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| ConversationSession::new(session_id));
        session.scenario = scenario.filter(|s| !s.trim().is_empty());
    }

    /// Point-in-time copy of a session.
    pub fn snapshot(&self, session_id: &str) -> Option<ConversationSession> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    /// Destroy a session (explicit clear or connection teardown). Returns whether it existed.
    pub fn clear(&self, session_id: &str) -> bool {
        let existed = self.sessions.remove(session_id).is_some();
        if existed {
            debug!(session_id, "conversation session cleared");
        }
        existed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eleven_appends_keep_last_ten_in_order() {
        let store = ConversationContinuity::default();
        for i in 0..11 {
            store.append_turn("s", &format!("user {i}"), &format!("assistant {i}"));
        }
        let session = store.snapshot("s").unwrap();
        assert_eq!(session.turns.len(), 10);
        let users: Vec<String> = session.turns.iter().map(|t| t.user_text.clone()).collect();
        let expected: Vec<String> = (1..11).map(|i| format!("user {i}")).collect();
        assert_eq!(users, expected);
    }

    #[test]
    fn context_window_is_chronological() {
        let store = ConversationContinuity::default();
        store.append_turn("s", "one", "1");
        store.append_turn("s", "two", "2");
        store.append_turn("s", "two", "2");

        let window = store.get_context_window("s", 2);
        let contents: Vec<&str> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "2", "two", "2"]);
        assert!(store.get_context_window("missing", 5).is_empty());
    }

    #[test]
    fn provider_id_and_clear() {
        let store = ConversationContinuity::default();
        assert_eq!(store.get_provider_conversation_id("s"), None);
        store.set_provider_conversation_id("s", "abc");
        assert_eq!(store.get_provider_conversation_id("s").as_deref(), Some("abc"));
        assert!(store.clear("s"));
        assert!(!store.clear("s"));
        assert_eq!(store.get_provider_conversation_id("s"), None);
    }

    #[test]
    fn appends_reach_the_transcript_log() {
        let log = Arc::new(TranscriptLog::temporary().unwrap());
        let store = ConversationContinuity::new(2).with_transcript_log(Arc::clone(&log));
        for i in 0..3 {
            store.append_turn("s", &format!("q{i}"), "a");
        }
        // The in-memory window is capped; the log keeps everything.
        assert_eq!(store.snapshot("s").unwrap().turns.len(), 2);
        assert_eq!(log.history("s").unwrap().len(), 3);
    }

    #[test]
    fn detach_by_a_replaced_owner_keeps_the_session() {
        let store = ConversationContinuity::default();
        let (old, new) = (Uuid::new_v4(), Uuid::new_v4());
        store.attach("s", old);
        store.attach("s", new);
        store.set_provider_conversation_id("s", "conv");
        store.append_turn("s", "hi", "hello");

        assert!(!store.detach("s", old));
        assert!(!store.reset("s", old));
        let session = store.snapshot("s").unwrap();
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.provider_conversation_id.as_deref(), Some("conv"));

        assert!(store.detach("s", new));
        assert!(store.snapshot("s").is_none());
    }

    #[test]
    fn commit_is_skipped_once_the_guard_moves_on() {
        let store = ConversationContinuity::default();
        let generation = crate::guard::TurnGeneration::new();
        let guard = generation.guard();
        let turn = PendingTurn {
            user_text: "hi",
            assistant_text: "hello",
            audio: None,
            source: ResponseSource::Primary,
            provider_conversation_id: Some("conv".into()),
        };
        assert!(store.commit("s", turn.clone(), &guard).is_some());

        generation.advance();
        assert!(store.commit("s", turn, &guard).is_none());
        let session = store.snapshot("s").unwrap();
        assert_eq!(session.turns.len(), 1);
        assert_eq!(session.provider_conversation_id.as_deref(), Some("conv"));
    }

    #[test]
    fn blank_scenario_is_unset() {
        let store = ConversationContinuity::default();
        store.set_scenario("s", Some("job-interview".into()));
        assert_eq!(store.scenario("s").as_deref(), Some("job-interview"));
        store.set_scenario("s", Some("  ".into()));
        assert_eq!(store.scenario("s"), None);
    }
}
