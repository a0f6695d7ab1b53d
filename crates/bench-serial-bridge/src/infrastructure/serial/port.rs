//! Real serial port, via the `serialport` crate.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::info;

use super::{SerialError, Transport};

/// The instrument's serial line, 8N1 without flow control.
pub struct SerialPortTransport {
    port: Box<dyn SerialPort>,
}

impl SerialPortTransport {
    /// Opens `path` at `baud_rate`.
    ///
    /// # Errors
    ///
    /// Returns [`SerialError::TransportUnavailable`] if the device cannot be
    /// opened.
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, SerialError> {
        let port = serialport::new(path, baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(read_timeout)
            .open()
            .map_err(|e| SerialError::TransportUnavailable {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        info!(path, baud_rate, "opened serial port");
        Ok(Self { port })
    }
}

impl Transport for SerialPortTransport {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, SerialError> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<(), SerialError> {
        Ok(self.port.write_all(data)?)
    }

    fn flush(&mut self) -> Result<(), SerialError> {
        Ok(self.port.flush()?)
    }

    fn clear_input(&mut self) -> Result<(), SerialError> {
        Ok(self.port.clear(ClearBuffer::Input)?)
    }

    fn available(&mut self) -> Result<usize, SerialError> {
        Ok(self.port.bytes_to_read()? as usize)
    }
}
