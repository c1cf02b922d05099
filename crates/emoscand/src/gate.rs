//! Re-entrancy guard for operations that must never overlap.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Admits at most one holder at a time.
#[derive(Debug, Clone, Default)]
pub struct AcquireGate {
    busy: Arc<AtomicBool>,
}

/// Proof of admission. The gate reopens when the token is dropped.
#[derive(Debug)]
#[must_use = "the gate reopens as soon as the token is dropped"]
pub struct AcquireToken {
    busy: Arc<AtomicBool>,
}

impl AcquireGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the gate, or `None` if another token is outstanding.
    pub fn try_acquire(&self) -> Option<AcquireToken> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| AcquireToken {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for AcquireToken {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_refused_while_held() {
        let gate = AcquireGate::new();
        let token = gate.try_acquire();
        assert!(token.is_some());
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());
    }

    #[test]
    fn test_drop_reopens_gate() {
        let gate = AcquireGate::new();
        let token = gate.try_acquire().unwrap();
        drop(token);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn test_clones_share_state() {
        let gate = AcquireGate::new();
        let other = gate.clone();
        let _token = gate.try_acquire().unwrap();
        assert!(other.try_acquire().is_none());
    }

    #[test]
    fn test_exactly_one_winner_across_threads() {
        let gate = AcquireGate::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.try_acquire())
            })
            .collect();
        let winners: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(winners.iter().filter(|t| t.is_some()).count(), 1);
    }
}
