//! Broker connection settings shared by both bridge binaries.

use std::time::Duration;

use clap::Args;

/// Default MQTT port.
pub const DEFAULT_PORT: u16 = 1883;

/// Default bound of the telemetry channel.
pub const DEFAULT_TELEMETRY_CAPACITY: usize = 50;

/// Default pause between two connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Where the broker lives and how the two channels are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Broker hostname or IP address.
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Topic carrying client → device command frames.
    pub command_topic: String,
    /// Topic carrying device → client telemetry frames.
    pub telemetry_topic: String,
    /// Maximum telemetry frames held before the oldest is dropped.
    pub telemetry_capacity: usize,
    /// Fixed wait between reconnect attempts.
    pub retry_interval: Duration,
    /// Prefix of every MQTT client id this process uses.
    pub client_id_prefix: String,
    pub keep_alive: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            command_topic: "to_serial".to_string(),
            telemetry_topic: "from_serial".to_string(),
            telemetry_capacity: DEFAULT_TELEMETRY_CAPACITY,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            client_id_prefix: "bench".to_string(),
            keep_alive: Duration::from_secs(30),
        }
    }
}

impl BrokerConfig {
    /// `host:port`, for log lines and error messages.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Broker options, flattened into each binary's command line.
///
/// Every option can also come from an environment variable; the command line
/// wins when both are present.
#[derive(Debug, Clone, Args)]
pub struct BrokerArgs {
    /// Hostname or IP address of the MQTT broker.
    #[arg(long, default_value = "localhost", env = "MQ_HOST")]
    pub mq_host: String,

    /// TCP port of the MQTT broker.
    #[arg(long, default_value_t = DEFAULT_PORT, env = "MQ_PORT")]
    pub mq_port: u16,

    /// Broker user name.  Used only together with `--mq-pass`.
    #[arg(long, env = "MQ_USER")]
    pub mq_user: Option<String>,

    /// Broker password.
    #[arg(long, env = "MQ_PASS", hide_env_values = true)]
    pub mq_pass: Option<String>,

    /// Topic of the command channel (clients → device).
    #[arg(long, default_value = "to_serial", env = "MQ_COMMAND_TOPIC")]
    pub command_topic: String,

    /// Topic of the telemetry channel (device → clients).
    #[arg(long, default_value = "from_serial", env = "MQ_TELEMETRY_TOPIC")]
    pub telemetry_topic: String,

    /// Telemetry frames kept before the oldest is dropped.
    #[arg(long, default_value_t = DEFAULT_TELEMETRY_CAPACITY, env = "MQ_TELEMETRY_CAPACITY")]
    pub telemetry_capacity: usize,

    /// Seconds to wait between broker connection attempts.
    #[arg(long, default_value_t = 5, env = "BROKER_RETRY_INTERVAL")]
    pub retry_interval: u64,

    /// Prefix of this process's MQTT client ids.  Client ids name persistent
    /// sessions, so two bridges of the same kind on one broker need
    /// different prefixes.
    #[arg(long, env = "MQ_CLIENT_PREFIX")]
    pub client_prefix: Option<String>,
}

impl BrokerArgs {
    /// Converts the parsed options into a [`BrokerConfig`].  `client_id_prefix`
    /// applies unless `--client-prefix` was given.
    pub fn into_broker_config(self, client_id_prefix: &str) -> BrokerConfig {
        BrokerConfig {
            host: self.mq_host,
            port: self.mq_port,
            username: self.mq_user,
            password: self.mq_pass,
            command_topic: self.command_topic,
            telemetry_topic: self.telemetry_topic,
            telemetry_capacity: self.telemetry_capacity,
            retry_interval: Duration::from_secs(self.retry_interval),
            client_id_prefix: self
                .client_prefix
                .unwrap_or_else(|| client_id_prefix.to_string()),
            ..BrokerConfig::default()
        }
    }
}
