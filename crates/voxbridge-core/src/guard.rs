//! Turn generation counter used to discard results that arrive after a session moved on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic per-session counter. Advancing it invalidates every outstanding [`TurnGuard`].
#[derive(Debug, Clone, Default)]
pub struct TurnGeneration(Arc<AtomicU64>);

impl TurnGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    /// Move to the next generation and return it.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Guard bound to the current generation.
    pub fn guard(&self) -> TurnGuard {
        TurnGuard {
            counter: Arc::clone(&self.0),
            expected: self.current(),
        }
    }
}

/// Snapshot of a generation taken when a turn was dispatched.
#[derive(Debug, Clone)]
pub struct TurnGuard {
    counter: Arc<AtomicU64>,
    expected: u64,
}

impl TurnGuard {
    /// Guard that no one else can advance; always current.
    pub fn detached() -> Self {
        TurnGeneration::new().guard()
    }

    pub fn generation(&self) -> u64 {
        self.expected
    }

    pub fn is_current(&self) -> bool {
        self.counter.load(Ordering::SeqCst) == self.expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_invalidates_older_guards() {
        let gen = TurnGeneration::new();
        let first = gen.guard();
        assert!(first.is_current());

        assert_eq!(gen.advance(), 1);
        let second = gen.guard();
        assert!(!first.is_current());
        assert!(second.is_current());
        assert_eq!(second.generation(), 1);
    }

    #[test]
    fn detached_guard_stays_current() {
        assert!(TurnGuard::detached().is_current());
    }
}
