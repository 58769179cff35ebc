//! Core types for the NetShield event stream.
//!
//! This crate provides the protocol primitives: decoding inbound frames,
//! normalizing alert records, and the dashboard update shapes handed to
//! subscribers. It knows nothing about sockets; the client crate owns the
//! transport.

mod alert;
mod message;
mod update;

pub use alert::{Alert, RawAlert, Severity, SeverityParseError};
pub use message::{DecodeError, Frame, InboundMessage, Notification, LIVENESS_ACK, LIVENESS_PROBE};
pub use update::{AlertStats, DashboardUpdate};

use std::fmt;

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Not connected and not trying to be.
    #[default]
    Idle,
    /// Transport open in flight.
    Connecting,
    /// Live; frames flow and keepalive runs.
    Open,
    /// Transport reported close; deciding what happens next.
    Closed,
    /// Waiting out a backoff delay before the next attempt.
    ReconnectScheduled,
}

impl ConnectionState {
    /// Whether frames can currently flow.
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Closed => "closed",
            ConnectionState::ReconnectScheduled => "reconnect_scheduled",
        };
        f.write_str(name)
    }
}

/// Current UTC time in RFC 3339, used when the backend omits a timestamp.
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
