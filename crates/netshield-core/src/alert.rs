//! Alert records as the backend sends them and as subscribers see them.
//!
//! The backend does not assign alert identifiers, so one is derived from
//! the record's content: `timestamp_srcip_srcport_destip_destport_signature`
//! with every non-alphanumeric character replaced by `_`. Records without a
//! signature get a random suffix instead and therefore never compare equal
//! across redelivery.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

const UNKNOWN_SIGNATURE: &str = "Unknown Signature";
const UNKNOWN_CATEGORY: &str = "Unknown";
/// The backend has never sent a protocol field; TCP is what it monitors.
const DEFAULT_PROTOCOL: &str = "TCP";
const DEFAULT_ACTION: &str = "alert";

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    High,
    Medium,
    #[default]
    Low,
}

impl Severity {
    /// Lowercase tag as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = SeverityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            _ => Err(SeverityParseError(s.to_string())),
        }
    }
}

/// Error parsing a severity tag.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown severity tag: {0}")]
pub struct SeverityParseError(String);

/// An alert record exactly as the backend emits it.
///
/// Every field is optional; ports arrive as strings or numbers depending on
/// the backend version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawAlert {
    pub timestamp: Option<String>,
    pub signature: Option<String>,
    pub category: Option<String>,
    pub severity_tag: Option<String>,
    pub src_ip: Option<String>,
    pub src_port: Option<Value>,
    pub dest_ip: Option<String>,
    pub dest_port: Option<Value>,
    pub protocol: Option<String>,
    pub action: Option<String>,
    pub payload: Option<String>,
}

/// A normalized alert, as handed to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub timestamp: String,
    pub signature: String,
    pub category: String,
    pub severity: Severity,
    pub src_ip: String,
    pub src_port: u16,
    pub dest_ip: String,
    pub dest_port: u16,
    pub protocol: String,
    pub action: Option<String>,
    pub payload: Option<String>,
}

impl RawAlert {
    /// Normalize into the subscriber-facing form, filling defaults.
    pub fn normalize(self) -> Alert {
        let id = self.derive_id();
        let severity = self
            .severity_tag
            .as_deref()
            .and_then(|tag| tag.parse().ok())
            .unwrap_or_default();
        let protocol = self
            .protocol
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string());

        Alert {
            id,
            timestamp: self.timestamp.unwrap_or_default(),
            signature: self
                .signature
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| UNKNOWN_SIGNATURE.to_string()),
            category: self
                .category
                .filter(|c| !c.is_empty())
                .unwrap_or_else(|| UNKNOWN_CATEGORY.to_string()),
            severity,
            src_ip: self.src_ip.unwrap_or_default(),
            src_port: parse_port(self.src_port.as_ref()),
            dest_ip: self.dest_ip.unwrap_or_default(),
            dest_port: parse_port(self.dest_port.as_ref()),
            protocol,
            action: Some(self.action.unwrap_or_else(|| DEFAULT_ACTION.to_string())),
            payload: self.payload,
        }
    }

    /// Content-derived identifier. Uses the raw wire text of each field.
    pub fn derive_id(&self) -> String {
        // Empty counts as missing.
        let suffix = match self.signature.as_deref().filter(|s| !s.is_empty()) {
            Some(signature) => signature.to_string(),
            None => uuid::Uuid::new_v4().simple().to_string(),
        };
        let raw = format!(
            "{}_{}_{}_{}_{}_{}",
            self.timestamp.as_deref().unwrap_or_default(),
            self.src_ip.as_deref().unwrap_or_default(),
            wire_text(self.src_port.as_ref()),
            self.dest_ip.as_deref().unwrap_or_default(),
            wire_text(self.dest_port.as_ref()),
            suffix,
        );
        raw.chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect()
    }
}

fn wire_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Lenient integer parse: skip leading whitespace, take leading digits.
fn parse_port(value: Option<&Value>) -> u16 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|n| u16::try_from(n).ok())
            .unwrap_or(0),
        Some(Value::String(s)) => {
            let digits: String = s
                .trim_start()
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            digits.parse().unwrap_or(0)
        }
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawAlert {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn normalize_full_record() {
        let alert = raw(json!({
            "timestamp": "t1",
            "src_ip": "1.2.3.4",
            "src_port": "80",
            "dest_ip": "5.6.7.8",
            "dest_port": "443",
            "signature": "SQLi",
            "severity_tag": "high"
        }))
        .normalize();

        assert_eq!(alert.src_port, 80);
        assert_eq!(alert.dest_port, 443);
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.protocol, "TCP");
        assert_eq!(alert.signature, "SQLi");
        assert_eq!(alert.category, "Unknown");
        assert_eq!(alert.action.as_deref(), Some("alert"));
        assert_eq!(alert.id, "t1_1_2_3_4_80_5_6_7_8_443_SQLi");
    }

    #[test]
    fn defaults_for_missing_fields() {
        let alert = RawAlert::default().normalize();
        assert_eq!(alert.signature, "Unknown Signature");
        assert_eq!(alert.category, "Unknown");
        assert_eq!(alert.severity, Severity::Low);
        assert_eq!(alert.src_port, 0);
        assert_eq!(alert.src_ip, "");
        assert!(alert.payload.is_none());
    }

    #[test]
    fn empty_strings_count_as_missing() {
        let record = json!({"timestamp": "t", "signature": "", "category": ""});
        let a = raw(record.clone()).normalize();
        let b = raw(record).normalize();
        assert_eq!(a.signature, "Unknown Signature");
        assert_eq!(a.category, "Unknown");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn ports_parse_leniently() {
        assert_eq!(parse_port(Some(&json!(8080))), 8080);
        assert_eq!(parse_port(Some(&json!(" 22"))), 22);
        assert_eq!(parse_port(Some(&json!("53/udp"))), 53);
        assert_eq!(parse_port(Some(&json!("http"))), 0);
        assert_eq!(parse_port(Some(&json!(70000))), 0);
        assert_eq!(parse_port(Some(&json!(-1))), 0);
        assert_eq!(parse_port(None), 0);
    }

    #[test]
    fn wire_protocol_wins_over_default() {
        let alert = raw(json!({"protocol": "UDP"})).normalize();
        assert_eq!(alert.protocol, "UDP");

        let alert = raw(json!({"protocol": "  "})).normalize();
        assert_eq!(alert.protocol, "TCP");
    }

    #[test]
    fn id_is_deterministic_with_signature() {
        let record = json!({
            "timestamp": "2024-05-01T10:00:00Z",
            "src_ip": "10.0.0.1",
            "src_port": 5555,
            "dest_ip": "10.0.0.2",
            "dest_port": "22",
            "signature": "ET SCAN ssh"
        });
        let a = raw(record.clone()).normalize();
        let b = raw(record).normalize();
        assert_eq!(a.id, b.id);
        assert!(a.id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'));
    }

    #[test]
    fn id_is_random_without_signature() {
        let record = json!({"timestamp": "t", "src_ip": "1.1.1.1"});
        let a = raw(record.clone()).normalize();
        let b = raw(record).normalize();
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("t_1_1_1_1_"));
    }

    #[test]
    fn severity_parse() {
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert_eq!(" medium ".parse::<Severity>().unwrap(), Severity::Medium);
        assert!("critical".parse::<Severity>().is_err());

        let alert = raw(json!({"severity_tag": "critical"})).normalize();
        assert_eq!(alert.severity, Severity::Low);
    }

    #[test]
    fn alert_serializes_camel_case() {
        let alert = raw(json!({"src_ip": "1.2.3.4", "src_port": "80"})).normalize();
        let value = serde_json::to_value(&alert).unwrap();
        assert_eq!(value["srcIp"], "1.2.3.4");
        assert_eq!(value["srcPort"], 80);
        assert_eq!(value["severity"], "low");
    }
}
