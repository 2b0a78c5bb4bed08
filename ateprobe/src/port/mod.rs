//! Port abstraction over the physical serial transport.
//!
//! Protocol code never touches `serialport` directly; it talks to the
//! `Port` trait, which keeps the session logic testable against scripted
//! transports.
//!
//! ```text
//! +----------------------+       +----------------------+
//! | boot / fuzz / scan   |       |   LivenessMonitor    |
//! +----------+-----------+       +----------+-----------+
//!            |                              |
//!            v                              v
//! +----------+-----------+       +----------+-----------+
//! |   Channel<P: Port>   |       |  Box<dyn ControlLine>|
//! +----------+-----------+       +----------+-----------+
//!            |   data                       |  DTR only
//!            v                              v
//! +----------+------------------------------+-----------+
//! |            NativePort (serialport)                  |
//! +-----------------------------------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use ateprobe::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> std::io::Result<()> {
//!     port.write_all(b"000a00\r")?;
//!
//!     let mut buf = [0u8; 64];
//!     let n = port.read(&mut buf)?;
//!     println!("Received: {:?}", &buf[..n]);
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod scripted;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};

/// Serial port configuration.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Per-read timeout of the underlying driver.
    ///
    /// Kept short: the channel builds its own deadlines on top of it.
    pub timeout: Duration,
    /// Data bits (typically 8).
    pub data_bits: DataBits,
    /// Parity (typically None).
    pub parity: Parity,
    /// Stop bits (typically One).
    pub stop_bits: StopBits,
    /// Flow control (typically None).
    pub flow_control: FlowControl,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 115200,
            timeout: Duration::from_millis(100),
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the driver read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Number of data bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataBits {
    /// 7 data bits.
    Seven,
    /// 8 data bits.
    #[default]
    Eight,
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Parity {
    /// No parity.
    #[default]
    None,
    /// Odd parity.
    Odd,
    /// Even parity.
    Even,
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopBits {
    /// 1 stop bit.
    #[default]
    One,
    /// 2 stop bits.
    Two,
}

/// Flow control mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowControl {
    /// No flow control.
    #[default]
    None,
    /// Hardware flow control (RTS/CTS).
    Hardware,
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// A control-only view of a port.
///
/// It can drive modem lines but has no access to the data stream, so a
/// supervisor holding one cannot interleave bytes with the session.
pub trait ControlLine: Send {
    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;
}

/// Unified port trait for serial communication.
pub trait Port: Read + Write + Send {
    /// Set the driver read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current driver read timeout.
    fn timeout(&self) -> Duration;

    /// Get the current baud rate.
    fn baud_rate(&self) -> u32;

    /// Clear input/output buffers.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Set DTR (Data Terminal Ready) pin state.
    fn set_dtr(&mut self, level: bool) -> Result<()>;

    /// Open an independent control-line handle onto the same device.
    ///
    /// Ports without modem lines keep the default, which refuses.
    fn control_line(&self) -> Result<Box<dyn ControlLine>> {
        Err(Error::Unsupported(format!(
            "{} has no control lines",
            self.name()
        )))
    }

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_config_default() {
        let config = SerialConfig::default();
        assert_eq!(config.baud_rate, 115200);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.parity, Parity::None);
        assert_eq!(config.stop_bits, StopBits::One);
        assert_eq!(config.flow_control, FlowControl::None);
    }

    #[test]
    fn test_serial_config_builder() {
        let config = SerialConfig::new("/dev/ttyUSB0", 57600).with_timeout(Duration::from_millis(20));

        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.baud_rate, 57600);
        assert_eq!(config.timeout, Duration::from_millis(20));
    }

    struct Loopback(Vec<u8>);

    impl Read for Loopback {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = buf
                .len()
                .min(self.0.len());
            buf[..n].copy_from_slice(&self.0[..n]);
            self.0.drain(..n);
            Ok(n)
        }
    }

    impl Write for Loopback {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0
                .extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Port for Loopback {
        fn set_timeout(&mut self, _: Duration) -> Result<()> {
            Ok(())
        }

        fn timeout(&self) -> Duration {
            Duration::ZERO
        }

        fn baud_rate(&self) -> u32 {
            0
        }

        fn clear_buffers(&mut self) -> Result<()> {
            self.0
                .clear();
            Ok(())
        }

        fn name(&self) -> &str {
            "loopback"
        }

        fn set_dtr(&mut self, _: bool) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_control_line_unsupported_by_default() {
        let port = Loopback(Vec::new());
        let err = port
            .control_line()
            .err()
            .unwrap();
        assert!(matches!(err, Error::Unsupported(_)));
        assert!(
            err.to_string()
                .contains("loopback")
        );
    }

    #[test]
    fn test_write_all_bytes_default() {
        let mut port = Loopback(Vec::new());
        port.write_all_bytes(b"01fd01\r")
            .unwrap();
        let mut buf = [0u8; 7];
        port.read_exact(&mut buf)
            .unwrap();
        assert_eq!(&buf, b"01fd01\r");
    }
}
