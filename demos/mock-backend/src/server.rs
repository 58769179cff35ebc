//! Event stream server with a synthetic alert feed.

use crate::protocol::{BackendMessage, Snapshot};
use futures_util::{SinkExt, StreamExt};
use netshield_core::{AlertStats, LIVENESS_ACK, LIVENESS_PROBE, RawAlert, Severity};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tokio_tungstenite::tungstenite::Message;

/// (signature, category, severity, protocol, dest_port)
const SAMPLES: &[(&str, &str, Severity, &str, u16)] = &[
    ("ET SCAN Nmap SYN Scan", "Attempted Information Leak", Severity::Medium, "TCP", 22),
    ("ET EXPLOIT Possible SQL Injection", "Web Application Attack", Severity::High, "TCP", 80),
    ("ET POLICY DNS Query to .onion", "Potential Corporate Privacy Violation", Severity::Low, "UDP", 53),
    ("GPL ICMP PING", "Misc activity", Severity::Low, "ICMP", 0),
    ("ET MALWARE Suspicious Beacon", "A Network Trojan was detected", Severity::High, "TCP", 443),
];

/// Every n-th tick flips the capture engine.
const STATUS_EVERY: u64 = 15;
/// Every n-th tick purges history.
const CLEAR_EVERY: u64 = 40;

/// Shared feed state.
struct FeedState {
    interface: String,
    is_running: bool,
    stats: AlertStats,
    recent: Vec<RawAlert>,
    tick: u64,
}

impl FeedState {
    fn new(interface: String) -> Self {
        Self {
            interface,
            is_running: true,
            stats: AlertStats::default(),
            recent: Vec::new(),
            tick: 0,
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            alerts: self.recent.clone(),
            stats: self.stats,
            is_running: self.is_running,
            interface: self.interface.clone(),
            timestamp: now(),
        }
    }

    /// Advance the feed by one tick. `None` while capture is stopped.
    fn next_event(&mut self) -> Option<BackendMessage> {
        self.tick += 1;

        if self.tick % CLEAR_EVERY == 0 {
            self.stats = AlertStats::default();
            self.recent.clear();
            return Some(BackendMessage::Clear { timestamp: now() });
        }
        if self.tick % STATUS_EVERY == 0 {
            self.is_running = !self.is_running;
            return Some(BackendMessage::StatusChange {
                is_running: self.is_running,
                interface: self.interface.clone(),
                timestamp: now(),
            });
        }
        if !self.is_running {
            return None;
        }

        let (signature, category, severity, protocol, dest_port) =
            SAMPLES[(self.tick as usize) % SAMPLES.len()];
        let timestamp = now();
        let alert = RawAlert {
            timestamp: Some(timestamp.clone()),
            signature: Some(signature.to_string()),
            category: Some(category.to_string()),
            severity_tag: Some(severity.to_string()),
            src_ip: Some(format!("192.168.1.{}", 10 + self.tick % 200)),
            // Ports go out as strings, like the real capture pipeline.
            src_port: Some(Value::from((40000 + self.tick % 20000).to_string())),
            dest_ip: Some("10.0.0.1".to_string()),
            dest_port: Some(Value::from(dest_port.to_string())),
            protocol: Some(protocol.to_string()),
            action: Some("alert".to_string()),
            payload: None,
        };

        self.stats.total += 1;
        match severity {
            Severity::High => self.stats.high += 1,
            Severity::Medium => self.stats.medium += 1,
            Severity::Low => self.stats.low += 1,
        }
        self.recent.push(alert.clone());
        // Keep last 50 alerts
        if self.recent.len() > 50 {
            self.recent.remove(0);
        }

        Some(BackendMessage::NewAlert {
            alert,
            stats: self.stats,
            timestamp,
        })
    }
}

type SharedState = Arc<RwLock<FeedState>>;

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub async fn run(addr: SocketAddr, interface: String, interval: Duration) -> anyhow::Result<()> {
    let state = Arc::new(RwLock::new(FeedState::new(interface)));
    let (broadcast_tx, _) = broadcast::channel::<String>(100);

    tokio::spawn(feed(state.clone(), broadcast_tx.clone(), interval));

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Listening on ws://{}/ws", addr);

    loop {
        let (stream, client_addr) = listener.accept().await?;
        let state = state.clone();
        let broadcast_tx = broadcast_tx.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, client_addr, state, broadcast_tx).await {
                tracing::warn!("Connection error from {}: {}", client_addr, e);
            }
        });
    }
}

async fn feed(state: SharedState, broadcast_tx: broadcast::Sender<String>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(event) = state.write().await.next_event() else {
            continue;
        };
        match serde_json::to_string(&event) {
            Ok(text) => {
                // No receivers just means nobody is watching.
                let _ = broadcast_tx.send(text);
            }
            Err(e) => tracing::warn!("Failed to encode event: {}", e),
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: SharedState,
    broadcast_tx: broadcast::Sender<String>,
) -> anyhow::Result<()> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    tracing::info!("Dashboard connected from {}", addr);

    // Subscribe before the snapshot so nothing falls between the two.
    let mut broadcast_rx = broadcast_tx.subscribe();

    {
        let s = state.read().await;
        let initial = BackendMessage::Initial { data: s.snapshot() };
        sink.send(Message::Text(serde_json::to_string(&initial)?.into()))
            .await?;
    }

    loop {
        tokio::select! {
            msg = stream.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) if text.as_str() == LIVENESS_PROBE => {
                        sink.send(Message::Text(LIVENESS_ACK.into())).await?;
                    }
                    Message::Text(text) => {
                        tracing::debug!("Ignoring client message: {}", text.as_str());
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }

            msg = broadcast_rx.recv() => {
                match msg {
                    Ok(text) => sink.send(Message::Text(text.into())).await?,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("{} fell behind, skipped {} events", addr, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::info!("Dashboard disconnected: {}", addr);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netshield_core::{Frame, Notification};

    #[test]
    fn feed_counts_alerts_by_severity() {
        let mut state = FeedState::new("eth0".into());
        for _ in 0..10 {
            let _ = state.next_event();
        }
        let stats = state.stats;
        assert_eq!(stats.total, 10);
        assert_eq!(stats.high + stats.medium + stats.low, stats.total);
        assert_eq!(state.recent.len(), 10);
    }

    #[test]
    fn feed_stops_alerting_while_capture_is_off() {
        let mut state = FeedState::new("eth0".into());
        for _ in 1..STATUS_EVERY {
            let _ = state.next_event();
        }
        assert!(matches!(
            state.next_event(),
            Some(BackendMessage::StatusChange { is_running: false, .. })
        ));
        assert!(state.next_event().is_none());
    }

    #[test]
    fn feed_clears_history() {
        let mut state = FeedState::new("eth0".into());
        for _ in 1..CLEAR_EVERY {
            let _ = state.next_event();
        }
        assert!(matches!(state.next_event(), Some(BackendMessage::Clear { .. })));
        assert_eq!(state.stats, AlertStats::default());
        assert!(state.recent.is_empty());
    }

    #[test]
    fn emitted_alerts_decode_on_the_client_side() {
        let mut state = FeedState::new("eth0".into());
        let event = state.next_event().unwrap();
        let text = serde_json::to_string(&event).unwrap();

        let notifications = Frame::decode(&text).unwrap().into_notifications();
        assert_eq!(notifications.len(), 2);
        let Notification::Alert(alert) = &notifications[0] else {
            panic!("expected an alert first");
        };
        assert_eq!(alert.dest_ip, "10.0.0.1");
        assert_ne!(alert.src_port, 0);
    }

    #[test]
    fn snapshot_decodes_as_initial() {
        let state = FeedState::new("eth0".into());
        let text = serde_json::to_string(&BackendMessage::Initial {
            data: state.snapshot(),
        })
        .unwrap();
        let notifications = Frame::decode(&text).unwrap().into_notifications();
        assert_eq!(notifications.len(), 1);
    }
}
