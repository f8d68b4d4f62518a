//! IPC message types for CLI ↔ daemon communication

use serde::{Deserialize, Serialize};

use crate::engine::EngineStatus;
use crate::engine::activity::ActivityEntry;

/// Requests sent from the CLI to the running daemon
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum EngineRequest {
    /// Resume recognition
    Start,

    /// Pause recognition and cancel pending actions
    Stop,

    /// Re-read rules and coordinates from disk
    ReloadRules,

    Status,

    /// Most recent activity entries, newest first
    RecentActivity,

    /// Type this text now, bypassing matching and debounce
    TestOutput(String),

    /// Health check
    Ping,

    /// Request graceful shutdown
    Shutdown,
}

/// Responses sent from the daemon to the CLI
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum EngineResponse {
    /// Acknowledgment that request was processed
    Ready,

    Status(EngineStatus),

    Activity(Vec<ActivityEntry>),

    /// Health check response
    Pong,

    /// Error occurred
    Error(String),
}
