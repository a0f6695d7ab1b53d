//! Bench instrument web bridge: entry point.
//!
//! Accepts WebSocket connections from clients (the bench web UI, scripts) and
//! turns their JSON requests into command frames on the message bus.  Device
//! telemetry coming back over the bus is relayed to every connected client.
//!
//! # Usage
//!
//! ```text
//! bench-web-bridge [OPTIONS]
//!
//! Options:
//!   --ws-bind <ADDR>          WebSocket bind address [default: 0.0.0.0]
//!   --ws-port <PORT>          WebSocket listener port [default: 8765]
//!   --state-file <PATH>       Device state snapshot file [default: none]
//!   --mq-host <HOST>          MQTT broker host [default: localhost]
//!   --mq-port <PORT>          MQTT broker port [default: 1883]
//!   --retry-interval <SECS>   Broker reconnect interval [default: 5]
//!   --client-prefix <PREFIX>  MQTT client id prefix [default: bench]
//! ```
//!
//! # Environment variable overrides
//!
//! CLI args take precedence when both are present.
//!
//! | Variable                | Default          | Description               |
//! |-------------------------|------------------|---------------------------|
//! | `BENCH_WS_BIND`         | `0.0.0.0`        | WebSocket bind address    |
//! | `BENCH_WS_PORT`         | `8765`           | WebSocket listener port   |
//! | `BENCH_STATE_FILE`      | unset            | Snapshot file             |
//! | `MQ_HOST` / `MQ_PORT`   | `localhost:1883` | Broker address            |
//! | `MQ_USER` / `MQ_PASS`   | unset            | Broker credentials        |
//! | `BROKER_RETRY_INTERVAL` | `5`              | Reconnect interval (secs) |
//! | `MQ_CLIENT_PREFIX`      | `bench`          | MQTT client id prefix     |
//!
//! # Architecture overview
//!
//! ```text
//! WebSocket clients  (JSON)
//!       ↕
//! bench-web-bridge  ← this process
//!       ↕  command channel / telemetry channel (MQTT)
//! bench-serial-bridge
//!       ↕  serial, 9600 baud
//! bench instrument
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use bench_broker::mqtt::MqttBrokerClient;
use bench_broker::BrokerArgs;
use bench_core::{NoopStore, StateStore};
use bench_web_bridge::application::{DeviceService, TelemetryRelay};
use bench_web_bridge::domain::WebBridgeConfig;
use bench_web_bridge::infrastructure::{run_server, TomlStateStore};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Bench instrument web bridge.
#[derive(Debug, Parser)]
#[command(
    name = "bench-web-bridge",
    about = "WebSocket front end for the bench instrument: device control and live telemetry",
    version
)]
struct Cli {
    /// IP address the WebSocket server binds to.
    #[arg(long, default_value = "0.0.0.0", env = "BENCH_WS_BIND")]
    ws_bind: IpAddr,

    /// TCP port the WebSocket server listens on.
    #[arg(long, default_value_t = 8765, env = "BENCH_WS_PORT")]
    ws_port: u16,

    /// File the device state is saved to after every change and restored
    /// from at startup.
    #[arg(long, env = "BENCH_STATE_FILE")]
    state_file: Option<PathBuf>,

    #[command(flatten)]
    broker: BrokerArgs,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`WebBridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the WebSocket port is 0.
    fn into_bridge_config(self) -> anyhow::Result<WebBridgeConfig> {
        anyhow::ensure!(self.ws_port != 0, "WebSocket port must not be 0");

        Ok(WebBridgeConfig {
            ws_bind_addr: SocketAddr::new(self.ws_bind, self.ws_port),
            broker: self.broker.into_broker_config("bench"),
            state_file: self.state_file,
        })
    }
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Sets `shutdown` to `true` on Ctrl+C or (on Unix) SIGTERM.
fn spawn_signal_listener(shutdown: Arc<watch::Sender<bool>>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("failed to listen for SIGTERM: {e}");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("received Ctrl+C; shutting down"),
                Err(e) => {
                    error!("failed to listen for Ctrl+C signal: {e}");
                    return;
                }
            },
            _ = terminate => info!("received SIGTERM; shutting down"),
        }
        shutdown.send_replace(true);
    });
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_bridge_config()?;
    info!(
        "bench web bridge starting: ws={}, broker={}",
        config.ws_bind_addr,
        config.broker.endpoint()
    );

    let store: Arc<dyn StateStore> = match &config.state_file {
        Some(path) => {
            info!("device state snapshots: {}", path.display());
            Arc::new(TomlStateStore::new(path))
        }
        None => Arc::new(NoopStore),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    spawn_signal_listener(Arc::clone(&shutdown_tx));

    let broker = Arc::new(MqttBrokerClient::start(&config.broker));
    let service = Arc::new(DeviceService::new(broker.clone(), store));
    let relay = Arc::new(TelemetryRelay::new(broker.clone(), service));

    let result = run_server(config.ws_bind_addr, relay, shutdown_rx).await;

    // Sessions have released the device by now; let their close frames go out.
    broker.shutdown().await;
    result?;

    info!("bench web bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
