//! Conversation data model: turns, sessions, chat messages and audio handles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Opaque handle to playable response audio.
///
/// Only the id and MIME type survive serialization; the bytes stay in process memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioRef {
    pub id: String,
    pub mime: String,
    #[serde(skip)]
    data: Arc<Vec<u8>>,
}

impl AudioRef {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            mime: mime.into(),
            data: Arc::new(bytes),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl PartialEq for AudioRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Which path produced the canonical assistant text for a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseSource {
    Primary,
    Secondary,
    Apology,
}

/// Role tag for a chat message sent to a stateless provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// One user/assistant exchange. Appended once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub turn_index: u64,
    pub user_text: String,
    pub assistant_text: String,
    pub audio_response_ref: Option<AudioRef>,
    pub source: ResponseSource,
    pub created_at: DateTime<Utc>,
}

/// Accumulated history of one logical conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub session_id: String,
    /// Opaque id issued by the primary provider; passed back on every later primary call.
    pub provider_conversation_id: Option<String>,
    pub scenario: Option<String>,
    pub turns: VecDeque<TurnRecord>,
    pub created_at: DateTime<Utc>,
    next_turn_index: u64,
}

impl ConversationSession {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            provider_conversation_id: None,
            scenario: None,
            turns: VecDeque::new(),
            created_at: Utc::now(),
            next_turn_index: 0,
        }
    }

    /// Append a turn and evict the oldest entries beyond `max_turns` (FIFO).
    pub fn push_turn(
        &mut self,
        user_text: &str,
        assistant_text: &str,
        audio_response_ref: Option<AudioRef>,
        source: ResponseSource,
        max_turns: usize,
    ) -> TurnRecord {
        let record = TurnRecord {
            turn_index: self.next_turn_index,
            user_text: user_text.to_string(),
            assistant_text: assistant_text.to_string(),
            audio_response_ref,
            source,
            created_at: Utc::now(),
        };
        self.next_turn_index += 1;
        self.turns.push_back(record.clone());
        while self.turns.len() > max_turns.max(1) {
            self.turns.pop_front();
        }
        record
    }

    /// The most recent `max_turns` turns as alternating user/assistant messages, oldest first.
    pub fn context_window(&self, max_turns: usize) -> Vec<ChatMessage> {
        let skip = self.turns.len().saturating_sub(max_turns);
        self.turns
            .iter()
            .skip(skip)
            .flat_map(|t| {
                [
                    ChatMessage::user(t.user_text.clone()),
                    ChatMessage::assistant(t.assistant_text.clone()),
                ]
            })
            .collect()
    }

    /// Index the next appended turn will receive.
    pub fn next_turn_index(&self) -> u64 {
        self.next_turn_index
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_indices_keep_counting_after_eviction() {
        let mut session = ConversationSession::new("s1");
        for i in 0..4 {
            session.push_turn(&format!("q{i}"), &format!("a{i}"), None, ResponseSource::Primary, 2);
        }
        let indices: Vec<u64> = session.turns.iter().map(|t| t.turn_index).collect();
        assert_eq!(indices, vec![2, 3]);
        assert_eq!(session.next_turn_index(), 4);
    }

    #[test]
    fn context_window_alternates_roles() {
        let mut session = ConversationSession::new("s1");
        session.push_turn("hi", "hello", None, ResponseSource::Primary, 10);
        session.push_turn("weather?", "sunny", None, ResponseSource::Secondary, 10);

        let window = session.context_window(1);
        assert_eq!(
            window,
            vec![ChatMessage::user("weather?"), ChatMessage::assistant("sunny")]
        );
        assert_eq!(session.context_window(10).len(), 4);
        assert!(session.context_window(0).is_empty());
    }

    #[test]
    fn audio_ref_serializes_without_bytes() {
        let audio = AudioRef::new(vec![1, 2, 3], "audio/mpeg");
        let json = serde_json::to_value(&audio).unwrap();
        assert_eq!(json["mime"], "audio/mpeg");
        assert!(json.get("data").is_none());
        let back: AudioRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, audio);
        assert!(back.is_empty());
    }
}
