//! Reconnecting event-stream client for the NetShield IDS backend.
//!
//! [`StreamConnectionManager`] keeps one WebSocket open to the backend,
//! probes it with a keepalive, reconnects with capped exponential backoff
//! and fans decoded events out to three kinds of subscribers:
//!
//! - alerts ([`StreamConnectionManager::on_alert`])
//! - dashboard updates ([`StreamConnectionManager::on_dashboard_update`])
//! - connection status ([`StreamConnectionManager::on_connection_change`])
//!
//! ```no_run
//! use netshield_client::{ClientConfig, StreamConnectionManager};
//!
//! # async fn run() -> Result<(), netshield_client::ClientError> {
//! let manager = StreamConnectionManager::new(ClientConfig::default())?;
//! let _alerts = manager.on_alert(|alert| println!("{} {}", alert.severity, alert.signature));
//! manager.connect();
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod manager;
mod registry;
mod transport;

pub use config::{
    ClientConfig, ReconnectPolicy, DEFAULT_BASE_DELAY_MS, DEFAULT_KEEPALIVE_INTERVAL_MS,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY_MS, DEFAULT_URL,
};
pub use error::{ClientError, ConfigError, TransportError};
pub use manager::StreamConnectionManager;
pub use registry::Subscription;
pub use transport::{Connector, Transport, WsConnector, WsTransport};

pub use netshield_core::{Alert, AlertStats, ConnectionState, DashboardUpdate, Severity};
