//! Sled-backed transcript log: a key-value append of every recorded turn.
//! Keys are `{session_id}/{turn_index:08}` so a prefix scan yields one session in order.

use crate::error::CoreResult;
use crate::types::TurnRecord;
use std::path::Path;

pub struct TranscriptLog {
    db: sled::Db,
}

impl TranscriptLog {
    /// Open (or create) the log at `path`.
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    /// In-memory log that disappears on drop.
    pub fn temporary() -> CoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self { db })
    }

    pub fn append(&self, session_id: &str, record: &TurnRecord) -> CoreResult<()> {
        let key = format!("{}/{:08}", session_id, record.turn_index);
        let value = serde_json::to_vec(record)?;
        self.db.insert(key.as_bytes(), value)?;
        Ok(())
    }

    /// Every logged turn for a session, oldest first.
    pub fn history(&self, session_id: &str) -> CoreResult<Vec<TurnRecord>> {
        let prefix = format!("{}/", session_id);
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    pub fn flush(&self) -> CoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConversationSession, ResponseSource};

    #[test]
    fn history_is_scoped_and_ordered() {
        let log = TranscriptLog::temporary().unwrap();
        let mut a = ConversationSession::new("a");
        let mut b = ConversationSession::new("ab");
        for i in 0..3 {
            let rec = a.push_turn(&format!("q{i}"), "x", None, ResponseSource::Primary, 10);
            log.append("a", &rec).unwrap();
        }
        let rec = b.push_turn("other", "y", None, ResponseSource::Secondary, 10);
        log.append("ab", &rec).unwrap();

        let history = log.history("a").unwrap();
        let texts: Vec<&str> = history.iter().map(|t| t.user_text.as_str()).collect();
        assert_eq!(texts, vec!["q0", "q1", "q2"]);
        assert_eq!(log.history("ab").unwrap().len(), 1);
    }
}
