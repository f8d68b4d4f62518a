//! Bounded log of recent engine activity, newest first

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::info;

use crate::constants::activity::CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityTag {
    Engine,
    Fire,
    Reset,
    Recognition,
    Dispatch,
    Test,
}

impl fmt::Display for ActivityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivityTag::Engine => "engine",
            ActivityTag::Fire => "fire",
            ActivityTag::Reset => "reset",
            ActivityTag::Recognition => "recognition",
            ActivityTag::Dispatch => "dispatch",
            ActivityTag::Test => "test",
        };
        f.pad(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub at: DateTime<Local>,
    pub tag: ActivityTag,
    pub message: String,
}

#[derive(Debug)]
pub struct ActivityLog {
    entries: VecDeque<ActivityEntry>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(CAPACITY)
    }
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, tag: ActivityTag, message: impl Into<String>) {
        let message = message.into();
        info!(tag = %tag, "{}", message);
        self.entries.push_front(ActivityEntry {
            at: Local::now(),
            tag,
            message,
        });
        self.entries.truncate(self.capacity);
    }

    /// Entries newest first
    pub fn recent(&self) -> Vec<ActivityEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_first() {
        let mut log = ActivityLog::new();
        log.record(ActivityTag::Engine, "started");
        log.record(ActivityTag::Fire, "OK");
        let recent = log.recent();
        assert_eq!(recent[0].message, "OK");
        assert_eq!(recent[0].tag, ActivityTag::Fire);
        assert_eq!(recent[1].message, "started");
    }

    #[test]
    fn test_bounded_to_capacity() {
        let mut log = ActivityLog::new();
        for i in 0..(CAPACITY + 5) {
            log.record(ActivityTag::Fire, format!("fire {}", i));
        }
        assert_eq!(log.len(), CAPACITY);
        let recent = log.recent();
        assert_eq!(recent[0].message, format!("fire {}", CAPACITY + 4));
        assert_eq!(recent[CAPACITY - 1].message, "fire 5");
    }

    #[test]
    fn test_entry_serializes_tag_snake_case() {
        let mut log = ActivityLog::with_capacity(1);
        log.record(ActivityTag::Recognition, "timed out");
        let json = serde_json::to_string(&log.recent()[0]).unwrap();
        assert!(json.contains(r#""tag":"recognition""#));
    }
}
