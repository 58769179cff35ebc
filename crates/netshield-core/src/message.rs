//! Inbound frames and the notifications they produce.
//!
//! Frames are JSON objects tagged by `type`, except for the bare liveness
//! acknowledgment the backend sends in reply to a probe.

use crate::{now_rfc3339, Alert, AlertStats, DashboardUpdate, RawAlert};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Probe sent by the client while the connection is open.
pub const LIVENESS_PROBE: &str = "ping";
/// Backend's reply to a probe. Not JSON.
pub const LIVENESS_ACK: &str = "pong";

/// Messages sent from the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    /// Full dashboard state, sent once after the connection opens.
    Initial {
        #[serde(default)]
        data: Value,
    },
    /// One alert, optionally with refreshed counters.
    NewAlert {
        alert: RawAlert,
        /// Kept raw so a bad counter object never costs the alert.
        stats: Option<Value>,
        timestamp: Option<String>,
    },
    /// Capture engine started or stopped.
    StatusChange {
        is_running: Option<bool>,
        interface: Option<String>,
        timestamp: Option<String>,
    },
    /// All history was purged upstream.
    Clear { timestamp: Option<String> },
    /// Backend-initiated liveness signal.
    Keepalive,
    /// Any tag this client does not understand.
    #[serde(other)]
    Unrecognized,
}

/// A single decoded frame.
#[derive(Debug, Clone)]
pub enum Frame {
    /// Reply to our liveness probe.
    LivenessAck,
    /// A protocol message.
    Message(InboundMessage),
    /// Well-formed, but tagged with a type we don't handle.
    Unrecognized { kind: String },
}

/// Error decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// What a frame means for subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Alert(Alert),
    Dashboard(DashboardUpdate),
}

#[derive(Deserialize)]
struct Tag {
    #[serde(rename = "type")]
    kind: String,
}

impl Frame {
    /// Decode one text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        if text.trim() == LIVENESS_ACK {
            return Ok(Frame::LivenessAck);
        }

        match serde_json::from_str::<InboundMessage>(text)? {
            InboundMessage::Unrecognized => {
                let kind = serde_json::from_str::<Tag>(text)
                    .map(|tag| tag.kind)
                    .unwrap_or_default();
                Ok(Frame::Unrecognized { kind })
            }
            message => Ok(Frame::Message(message)),
        }
    }

    /// Notifications this frame produces. Liveness traffic and unknown
    /// tags produce none.
    pub fn into_notifications(self) -> Vec<Notification> {
        match self {
            Frame::Message(message) => message.into_notifications(),
            Frame::LivenessAck | Frame::Unrecognized { .. } => Vec::new(),
        }
    }
}

impl InboundMessage {
    /// The wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Initial { .. } => "initial",
            InboundMessage::NewAlert { .. } => "new_alert",
            InboundMessage::StatusChange { .. } => "status_change",
            InboundMessage::Clear { .. } => "clear",
            InboundMessage::Keepalive => "keepalive",
            InboundMessage::Unrecognized => "unrecognized",
        }
    }

    pub fn into_notifications(self) -> Vec<Notification> {
        match self {
            InboundMessage::Initial { data } => {
                vec![Notification::Dashboard(DashboardUpdate::Snapshot(data))]
            }
            InboundMessage::NewAlert {
                alert,
                stats,
                timestamp,
            } => {
                let mut out = vec![Notification::Alert(alert.normalize())];
                if let Some(stats) = stats.and_then(AlertStats::from_wire) {
                    out.push(Notification::Dashboard(DashboardUpdate::Stats {
                        stats,
                        timestamp: timestamp.unwrap_or_else(now_rfc3339),
                    }));
                }
                out
            }
            InboundMessage::StatusChange {
                is_running,
                interface,
                timestamp,
            } => vec![Notification::Dashboard(DashboardUpdate::Status {
                is_running: is_running.unwrap_or_default(),
                interface: interface.unwrap_or_default(),
                timestamp: timestamp.unwrap_or_else(now_rfc3339),
            })],
            InboundMessage::Clear { timestamp } => {
                vec![Notification::Dashboard(DashboardUpdate::Cleared {
                    timestamp: timestamp.unwrap_or_else(now_rfc3339),
                })]
            }
            InboundMessage::Keepalive | InboundMessage::Unrecognized => Vec::new(),
        }
    }
}
