//! Error types.
//!
//! None of these escape the lifecycle operations; transport failures become
//! state transitions and status notifications. They appear in logs and in
//! the constructors.

use std::path::PathBuf;

/// Error constructing a manager.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("no tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Error loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Error opening or using a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("transport closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}
