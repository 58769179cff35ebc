//! Dashboard updates pushed to subscribers alongside alerts.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Aggregate alert counters, as carried by `new_alert` frames.
///
/// Missing and null counters read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertStats {
    #[serde(deserialize_with = "zero_if_null")]
    pub total: u64,
    #[serde(deserialize_with = "zero_if_null")]
    pub high: u64,
    #[serde(deserialize_with = "zero_if_null")]
    pub medium: u64,
    #[serde(deserialize_with = "zero_if_null")]
    pub low: u64,
}

impl AlertStats {
    /// Counters from an arbitrary wire value. `None` if it isn't a counter
    /// object.
    pub fn from_wire(value: Value) -> Option<Self> {
        serde_json::from_value(value).ok()
    }
}

fn zero_if_null<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or_default())
}

/// Something on the dashboard changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum DashboardUpdate {
    /// Full dashboard state, forwarded verbatim. Sent once per connection.
    Snapshot(Value),
    /// Updated counters following a new alert.
    Stats { stats: AlertStats, timestamp: String },
    /// The backend's capture engine started or stopped.
    #[serde(rename_all = "camelCase")]
    Status {
        is_running: bool,
        interface: String,
        timestamp: String,
    },
    /// All alert history was purged upstream; discard what you hold.
    Cleared { timestamp: String },
}

impl DashboardUpdate {
    /// Timestamp of the update, if the variant carries one.
    pub fn timestamp(&self) -> Option<&str> {
        match self {
            DashboardUpdate::Snapshot(data) => data.get("timestamp").and_then(Value::as_str),
            DashboardUpdate::Stats { timestamp, .. }
            | DashboardUpdate::Status { timestamp, .. }
            | DashboardUpdate::Cleared { timestamp } => Some(timestamp),
        }
    }

    pub fn is_cleared(&self) -> bool {
        matches!(self, DashboardUpdate::Cleared { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn timestamp_per_variant() {
        let snapshot = DashboardUpdate::Snapshot(json!({"timestamp": "t0", "alerts": []}));
        assert_eq!(snapshot.timestamp(), Some("t0"));
        assert_eq!(DashboardUpdate::Snapshot(json!({})).timestamp(), None);

        let cleared = DashboardUpdate::Cleared {
            timestamp: "t2".into(),
        };
        assert_eq!(cleared.timestamp(), Some("t2"));
        assert!(cleared.is_cleared());
    }

    #[test]
    fn status_serializes_for_presentation() {
        let status = DashboardUpdate::Status {
            is_running: true,
            interface: "eth0".into(),
            timestamp: "t3".into(),
        };
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            json!({"kind": "status", "data": {"isRunning": true, "interface": "eth0", "timestamp": "t3"}})
        );
    }

    #[test]
    fn stats_from_wire() {
        assert_eq!(
            AlertStats::from_wire(json!({"total": 2, "low": null})),
            Some(AlertStats {
                total: 2,
                ..AlertStats::default()
            })
        );
        assert_eq!(AlertStats::from_wire(json!("lots")), None);
        assert_eq!(AlertStats::from_wire(json!({"high": -1})), None);
    }

    #[test]
    fn stats_default_missing_counters() {
        let stats: AlertStats = serde_json::from_value(json!({"total": 4, "high": 1})).unwrap();
        assert_eq!(
            stats,
            AlertStats {
                total: 4,
                high: 1,
                medium: 0,
                low: 0
            }
        );
    }
}
