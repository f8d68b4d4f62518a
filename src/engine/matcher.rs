//! Trigger matching against recognized text

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::matching::IDENTIFIER_SEPARATOR;
use crate::rules::{in_priority_order, Rule};

/// Value identity of "which triggers are on screen", compared across cycles
///
/// Triggers appear deduplicated, in rule priority order, joined by `,`.
/// The empty identifier means nothing matched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchIdentifier(String);

impl MatchIdentifier {
    pub fn empty() -> Self {
        Self::default()
    }

    fn from_triggers(triggers: &[&str]) -> Self {
        Self(triggers.join(IDENTIFIER_SEPARATOR))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for MatchIdentifier {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for MatchIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of matching one snapshot
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub identifier: MatchIdentifier,
    /// Matching enabled rules in priority order (first is the winner)
    pub rules: Vec<Rule>,
}

/// Remove every whitespace character (spaces, tabs, newlines)
pub fn normalize(raw: &str) -> String {
    raw.chars().filter(|c| !c.is_whitespace()).collect()
}

fn fold(text: &str) -> String {
    normalize(text).to_lowercase()
}

#[derive(Debug, Default)]
pub struct TriggerMatcher;

impl TriggerMatcher {
    pub fn new() -> Self {
        Self
    }

    /// Match `raw_text` against the enabled rules
    pub fn match_text(&self, raw_text: &str, rules: &[Rule]) -> MatchOutcome {
        let haystack = fold(raw_text);
        if haystack.is_empty() {
            return MatchOutcome::default();
        }

        let mut triggers: Vec<&str> = Vec::new();
        let mut matched = Vec::new();
        for rule in in_priority_order(rules) {
            if !rule.enabled {
                continue;
            }
            let needle = fold(&rule.trigger);
            if needle.is_empty() || !haystack.contains(&needle) {
                continue;
            }
            if !triggers.contains(&rule.trigger.as_str()) {
                triggers.push(&rule.trigger);
            }
            matched.push(rule.clone());
        }

        MatchOutcome {
            identifier: MatchIdentifier::from_triggers(&triggers),
            rules: matched,
        }
    }
}
