//! Detection of "generic" primary-provider replies.
//!
//! The primary agent sometimes answers a continued conversation with boilerplate that
//! ignores everything said before. Such a reply is a soft failure. The check is a trait
//! so a provider-side confidence signal can replace the phrase list.

/// Decides whether a reply shows the provider disengaged from the conversation.
pub trait EngagementCheck: Send + Sync {
    fn is_generic(&self, reply: &str) -> bool;
}

/// Boilerplate the primary agent emits when it loses the thread.
pub const DEFAULT_GENERIC_PHRASES: &[&str] = &[
    "Hello! How can I help you today?",
    "Hi there! How can I help you today?",
    "How can I help you today?",
    "Hello! How can I assist you today?",
    "How can I assist you today?",
    "What would you like to talk about?",
    "I'm here to help. What would you like to talk about?",
    "Is there anything else I can help you with?",
];

/// Exact-match deny-list. Comparison ignores case, repeated whitespace,
/// curly apostrophes and trailing punctuation, nothing else.
#[derive(Debug, Clone)]
pub struct PhraseDenyList {
    phrases: Vec<String>,
}

impl Default for PhraseDenyList {
    fn default() -> Self {
        Self::new(DEFAULT_GENERIC_PHRASES.iter().copied())
    }
}

impl PhraseDenyList {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| normalize(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        Self { phrases }
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

impl EngagementCheck for PhraseDenyList {
    fn is_generic(&self, reply: &str) -> bool {
        let reply = normalize(reply);
        self.phrases.iter().any(|p| *p == reply)
    }
}

fn normalize(s: &str) -> String {
    let collapsed = s
        .replace('\u{2019}', "'")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ','))
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_whole_phrase_only() {
        let list = PhraseDenyList::default();
        assert!(list.is_generic("How can I help you today?"));
        assert!(list.is_generic("  how can I   help you today "));
        assert!(list.is_generic("I\u{2019}m here to help. What would you like to talk about?"));
        assert!(!list.is_generic("How can I help you today with the weather in Paris?"));
        assert!(!list.is_generic("It is sunny."));
    }

    #[test]
    fn custom_phrases_replace_defaults() {
        let list = PhraseDenyList::new(["Bonjour !", ""]);
        assert_eq!(list.len(), 1);
        assert!(list.is_generic("bonjour"));
        assert!(!list.is_generic("How can I help you today?"));
    }
}
