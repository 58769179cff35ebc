//! Stand-in for the NetShield backend.
//!
//! Serves the event stream on `/ws` with synthetic traffic so the client can
//! be exercised without a capture engine:
//! - an `initial` snapshot on connect
//! - a `new_alert` with updated counters every tick
//! - the occasional `status_change` and `clear`
//! - `pong` in reply to `ping`
//!
//! Run it, then point the watch demo at it:
//!   cargo run -p netshield-demo-mock-backend -- --port 5000 --interval-ms 1500
//!   cargo run -p netshield-demo-watch -- --url ws://localhost:5000/ws

mod protocol;
mod server;

use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("netshield_demo_mock_backend=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port = parse_arg(&args, "--port").unwrap_or(5000);
    let interval_ms = parse_arg(&args, "--interval-ms").unwrap_or(1500);
    let interface = parse_arg_string(&args, "--interface").unwrap_or_else(|| "eth0".to_string());

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();

    tracing::info!("Capturing (pretend) on {}", interface);
    server::run(addr, interface, Duration::from_millis(interval_ms)).await
}

fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}

fn parse_arg_string(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
