//! Tail the NetShield event stream from a terminal.
//!
//! Connects with the same manager the dashboard uses and logs every alert,
//! dashboard update and connection change. Ctrl-C disconnects cleanly.
//!
//!   cargo run -p netshield-demo-watch -- --url ws://localhost:5000/ws
//!   NETSHIELD_CONFIG=netshield.toml cargo run -p netshield-demo-watch

use anyhow::Context;
use clap::Parser;
use netshield_client::{ClientConfig, DashboardUpdate, Severity, StreamConnectionManager};
use serde_json::Value;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "netshield-watch", about = "Tail the NetShield IDS event stream")]
struct Cli {
    /// Event-stream endpoint. Overrides the config file.
    #[arg(long, env = "NETSHIELD_WS_URL")]
    url: Option<String>,

    /// TOML client config.
    #[arg(long, env = "NETSHIELD_CONFIG")]
    config: Option<PathBuf>,

    /// Hide alerts below this severity.
    #[arg(long, default_value = "low")]
    min_severity: Severity,
}

fn rank(severity: Severity) -> u8 {
    match severity {
        Severity::Low => 0,
        Severity::Medium => 1,
        Severity::High => 2,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("netshield=info".parse()?))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(url) = cli.url {
        config.url = url;
    }

    let manager = StreamConnectionManager::new(config)?;
    tracing::info!("Watching {}", manager.url());

    let threshold = rank(cli.min_severity);
    let _alerts = manager.on_alert(move |alert| {
        if rank(alert.severity) < threshold {
            return;
        }
        tracing::info!(
            "[{}] {} {}:{} -> {}:{} {} ({})",
            alert.severity,
            alert.protocol,
            alert.src_ip,
            alert.src_port,
            alert.dest_ip,
            alert.dest_port,
            alert.signature,
            alert.category
        );
    });

    let _updates = manager.on_dashboard_update(|update| match update {
        DashboardUpdate::Snapshot(data) => {
            let alerts = data
                .get("alerts")
                .and_then(Value::as_array)
                .map_or(0, Vec::len);
            tracing::info!("Snapshot with {} recent alerts", alerts);
        }
        DashboardUpdate::Stats { stats, .. } => {
            tracing::info!(
                "Totals: {} ({} high, {} medium, {} low)",
                stats.total,
                stats.high,
                stats.medium,
                stats.low
            );
        }
        DashboardUpdate::Status {
            is_running,
            interface,
            ..
        } => {
            let verb = if *is_running { "started" } else { "stopped" };
            tracing::info!("Capture {} on {}", verb, interface);
        }
        DashboardUpdate::Cleared { timestamp } => {
            tracing::info!("Alert history cleared at {}", timestamp);
        }
    });

    let status = manager.clone();
    let _status = manager.on_connection_change(move |connected| {
        if connected {
            tracing::info!("Connected");
        } else {
            tracing::warn!("Disconnected ({})", status.state());
        }
    });

    manager.connect();

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;
    manager.disconnect();
    Ok(())
}
