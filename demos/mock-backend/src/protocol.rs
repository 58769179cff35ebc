//! Frames the backend pushes to dashboard clients.

use netshield_core::{AlertStats, RawAlert};
use serde::Serialize;

/// Outbound messages, tagged the way the dashboard expects.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackendMessage {
    /// Full state for a freshly connected client.
    Initial { data: Snapshot },
    NewAlert {
        alert: RawAlert,
        stats: AlertStats,
        timestamp: String,
    },
    StatusChange {
        is_running: bool,
        interface: String,
        timestamp: String,
    },
    /// Alert history was purged.
    Clear { timestamp: String },
}

/// Dashboard state at connect time.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    /// Recent alerts (newest last).
    pub alerts: Vec<RawAlert>,
    pub stats: AlertStats,
    pub is_running: bool,
    pub interface: String,
    pub timestamp: String,
}
