//! Serial bridge configuration.

use std::time::Duration;

use bench_broker::BrokerConfig;

/// Default serial device path.
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyACM0";

/// The instrument's fixed line speed.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Longest a single serial read blocks before pending writes are serviced.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Configuration for the serial bridge process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialBridgeConfig {
    /// Path of the serial device.
    pub serial_port: String,
    pub baud_rate: u32,
    /// Read timeout of the serial port.  Bounds the latency of a queued write.
    pub read_timeout: Duration,
    /// Broker location, topics, and retry interval.
    pub broker: BrokerConfig,
}

impl Default for SerialBridgeConfig {
    fn default() -> Self {
        Self {
            serial_port: DEFAULT_SERIAL_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            broker: BrokerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_serial_settings() {
        let config = SerialBridgeConfig::default();

        assert_eq!(config.serial_port, "/dev/ttyACM0");
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.read_timeout, Duration::from_millis(20));
        assert_eq!(config.broker.retry_interval, Duration::from_secs(5));
    }
}
