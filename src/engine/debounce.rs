//! Debounce / hysteresis state machine
//!
//! A stable new identifier fires exactly once. Repeats of the same identifier
//! are suppressed. Empty cycles only clear the armed identifier after
//! `threshold` of them in a row, so a single missed recognition does not
//! cause a second fire.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::matcher::MatchIdentifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebounceState {
    Idle,
    Armed,
}

/// What a single `on_match` call decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// New non-empty identifier: act on it
    Fire { identifier: MatchIdentifier },
    /// Same identifier as the armed one
    Suppressed,
    /// Empty cycle below the threshold
    Holding { empty_count: u32 },
    /// Empty cycles reached the threshold and cleared the armed identifier
    Reset { cleared: MatchIdentifier },
    /// Empty cycle while already idle
    Idle,
}

impl Transition {
    pub fn should_fire(&self) -> bool {
        matches!(self, Transition::Fire { .. })
    }
}

#[derive(Debug)]
pub struct DebounceStateMachine {
    threshold: u32,
    last_match: MatchIdentifier,
    consecutive_empty: u32,
}

impl DebounceStateMachine {
    /// `threshold` is clamped to at least 1
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            last_match: MatchIdentifier::empty(),
            consecutive_empty: 0,
        }
    }

    pub fn on_match(&mut self, identifier: &MatchIdentifier) -> Transition {
        if identifier.is_empty() {
            self.consecutive_empty = self.consecutive_empty.saturating_add(1);
            if self.last_match.is_empty() {
                return Transition::Idle;
            }
            if self.consecutive_empty >= self.threshold {
                let cleared = std::mem::take(&mut self.last_match);
                self.consecutive_empty = 0;
                info!(cleared = %cleared, threshold = self.threshold, "Trigger gone, debounce reset");
                return Transition::Reset { cleared };
            }
            debug!(empty_count = self.consecutive_empty, "Empty cycle while armed");
            return Transition::Holding {
                empty_count: self.consecutive_empty,
            };
        }

        self.consecutive_empty = 0;
        if identifier == &self.last_match {
            return Transition::Suppressed;
        }

        self.last_match = identifier.clone();
        Transition::Fire {
            identifier: identifier.clone(),
        }
    }

    pub fn state(&self) -> DebounceState {
        if self.last_match.is_empty() {
            DebounceState::Idle
        } else {
            DebounceState::Armed
        }
    }

    pub fn last_match(&self) -> &MatchIdentifier {
        &self.last_match
    }

    pub fn consecutive_empty(&self) -> u32 {
        self.consecutive_empty
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.last_match = MatchIdentifier::empty();
        self.consecutive_empty = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> MatchIdentifier {
        MatchIdentifier::from(s)
    }

    #[test]
    fn test_new_identifier_fires_once() {
        let mut debounce = DebounceStateMachine::new(3);
        assert!(debounce.on_match(&id("OK")).should_fire());
        for _ in 0..10 {
            assert_eq!(debounce.on_match(&id("OK")), Transition::Suppressed);
        }
        assert_eq!(debounce.state(), DebounceState::Armed);
    }

    #[test]
    fn test_single_empty_does_not_reset() {
        let mut debounce = DebounceStateMachine::new(3);
        assert!(debounce.on_match(&id("M")).should_fire());
        assert_eq!(debounce.on_match(&id("")), Transition::Holding { empty_count: 1 });
        assert_eq!(debounce.on_match(&id("M")), Transition::Suppressed);
    }

    #[test]
    fn test_threshold_empties_reset_then_refire() {
        let mut debounce = DebounceStateMachine::new(3);
        debounce.on_match(&id("M"));
        assert_eq!(debounce.on_match(&id("")), Transition::Holding { empty_count: 1 });
        assert_eq!(debounce.on_match(&id("")), Transition::Holding { empty_count: 2 });
        assert_eq!(debounce.on_match(&id("")), Transition::Reset { cleared: id("M") });
        assert_eq!(debounce.state(), DebounceState::Idle);
        assert!(debounce.on_match(&id("M")).should_fire());
    }

    #[test]
    fn test_interrupted_empties_start_over() {
        let mut debounce = DebounceStateMachine::new(3);
        debounce.on_match(&id("M"));
        debounce.on_match(&id(""));
        debounce.on_match(&id(""));
        // Seen again before the threshold: counter restarts
        assert_eq!(debounce.on_match(&id("M")), Transition::Suppressed);
        assert_eq!(debounce.consecutive_empty(), 0);
        debounce.on_match(&id(""));
        debounce.on_match(&id(""));
        assert_eq!(debounce.state(), DebounceState::Armed);
    }

    #[test]
    fn test_different_identifier_fires_immediately() {
        let mut debounce = DebounceStateMachine::new(3);
        assert!(debounce.on_match(&id("a")).should_fire());
        assert!(debounce.on_match(&id("b,a")).should_fire());
        assert!(debounce.on_match(&id("a")).should_fire());
        assert_eq!(debounce.last_match(), &id("a"));
    }

    #[test]
    fn test_empty_while_idle_never_fires() {
        let mut debounce = DebounceStateMachine::new(2);
        for _ in 0..5 {
            assert_eq!(debounce.on_match(&id("")), Transition::Idle);
        }
        assert_eq!(debounce.state(), DebounceState::Idle);
    }

    #[test]
    fn test_threshold_one_resets_on_first_empty() {
        let mut debounce = DebounceStateMachine::new(0);
        assert_eq!(debounce.threshold(), 1);
        debounce.on_match(&id("x"));
        assert!(matches!(debounce.on_match(&id("")), Transition::Reset { .. }));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut debounce = DebounceStateMachine::new(3);
        debounce.on_match(&id("x"));
        debounce.reset();
        assert_eq!(debounce.state(), DebounceState::Idle);
        assert!(debounce.on_match(&id("x")).should_fire());
    }
}
