//! Bench instrument serial bridge: entry point.
//!
//! Opens the instrument's serial port and relays frames in both directions:
//! commands from the broker's command channel to the device, telemetry from
//! the device to the broker's telemetry channel.
//!
//! # Usage
//!
//! ```text
//! bench-serial-bridge [OPTIONS]
//!
//! Options:
//!   --serial-port <PATH>      Serial device [default: /dev/ttyACM0]
//!   --baud-rate <BAUD>        Line speed [default: 9600]
//!   --read-timeout-ms <MS>    Serial read timeout [default: 20]
//!   --mq-host <HOST>          MQTT broker host [default: localhost]
//!   --mq-port <PORT>          MQTT broker port [default: 1883]
//!   --retry-interval <SECS>   Broker reconnect interval [default: 5]
//!   --client-prefix <PREFIX>  MQTT client id prefix [default: bench]
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                | Default        | Description                  |
//! |-------------------------|----------------|------------------------------|
//! | `SERIAL_PORT`           | `/dev/ttyACM0` | Serial device path           |
//! | `SERIAL_BAUDRATE`       | `9600`         | Line speed                   |
//! | `MQ_HOST` / `MQ_PORT`   | `localhost:1883` | Broker address             |
//! | `MQ_USER` / `MQ_PASS`   | unset          | Broker credentials           |
//! | `BROKER_RETRY_INTERVAL` | `5`            | Reconnect interval (secs)    |
//! | `MQ_CLIENT_PREFIX`      | `bench`        | MQTT client id prefix        |
//!
//! # Failure policy
//!
//! A serial port that cannot be opened is fatal: the process logs the error
//! and exits non-zero.  A broker that cannot be reached is not: both bridge
//! directions keep retrying at the fixed interval until it comes back.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bench_broker::mqtt::MqttBroker;
use bench_broker::{BrokerArgs, TelemetryQueue};
use bench_serial_bridge::application::{CommandBridge, TelemetryBridge};
use bench_serial_bridge::domain::SerialBridgeConfig;
use bench_serial_bridge::infrastructure::serial::{SerialPortTransport, SerialWorker};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Bench instrument serial bridge.
#[derive(Debug, Parser)]
#[command(
    name = "bench-serial-bridge",
    about = "Relays command and telemetry frames between the message bus and the bench instrument",
    version
)]
struct Cli {
    /// Path of the instrument's serial device.
    #[arg(long, default_value = "/dev/ttyACM0", env = "SERIAL_PORT")]
    serial_port: String,

    /// Serial line speed.
    #[arg(long, default_value_t = 9600, env = "SERIAL_BAUDRATE")]
    baud_rate: u32,

    /// Longest a serial read may block, in milliseconds.  Queued writes wait
    /// at most this long.
    #[arg(long, default_value_t = 20, env = "SERIAL_READ_TIMEOUT_MS")]
    read_timeout_ms: u64,

    #[command(flatten)]
    broker: BrokerArgs,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`SerialBridgeConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if the serial port path is empty or the baud rate is 0.
    fn into_bridge_config(self) -> anyhow::Result<SerialBridgeConfig> {
        anyhow::ensure!(!self.serial_port.trim().is_empty(), "serial port path is empty");
        anyhow::ensure!(self.baud_rate > 0, "baud rate must be positive");

        Ok(SerialBridgeConfig {
            serial_port: self.serial_port,
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            broker: self.broker.into_broker_config("bench"),
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

/// Program entry point.
///
/// # What happens at startup
///
/// 1. Logging is initialised from `RUST_LOG` (default `info`).
/// 2. CLI arguments are parsed into a [`SerialBridgeConfig`].
/// 3. The serial port is opened; failure here ends the process.
/// 4. The serial worker thread takes ownership of the port.
/// 5. The command and telemetry bridges run until shutdown, or until the
///    serial side fails.
/// 6. The worker is stopped and the port released.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_bridge_config()?;
    info!(
        "bench serial bridge starting: serial={} @ {} baud, broker={}",
        config.serial_port,
        config.baud_rate,
        config.broker.endpoint()
    );

    let transport =
        SerialPortTransport::open(&config.serial_port, config.baud_rate, config.read_timeout)
            .with_context(|| format!("cannot open serial port {}", config.serial_port))?;

    let telemetry = Arc::new(TelemetryQueue::new(config.broker.telemetry_capacity));
    let worker = SerialWorker::spawn(transport, Arc::clone(&telemetry))
        .context("failed to start serial worker")?;

    let broker = Arc::new(MqttBroker::new(config.broker.clone()));
    let commands = CommandBridge::new(broker.clone(), worker.handle(), config.broker.retry_interval);
    let outbound = TelemetryBridge::new(broker, telemetry, config.broker.retry_interval);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    spawn_signal_listener(Arc::clone(&shutdown_tx));

    // A fatal serial error in either direction stops the other one too.
    let command_result = {
        let shutdown_tx = Arc::clone(&shutdown_tx);
        let shutdown_rx = shutdown_rx.clone();
        async move {
            let result = commands.run(shutdown_rx).await;
            if result.is_err() {
                shutdown_tx.send_replace(true);
            }
            result
        }
    };
    let telemetry_result = {
        let shutdown_tx = Arc::clone(&shutdown_tx);
        async move {
            let result = outbound.run(shutdown_rx).await;
            if result.is_err() {
                shutdown_tx.send_replace(true);
            }
            result
        }
    };
    let (command_result, telemetry_result) = tokio::join!(command_result, telemetry_result);

    let worker_result = tokio::task::spawn_blocking(move || worker.shutdown())
        .await
        .context("serial worker panicked")?;

    command_result.context("command bridge failed")?;
    telemetry_result.context("telemetry bridge failed")?;
    worker_result.context("serial worker failed")?;

    info!("bench serial bridge stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
