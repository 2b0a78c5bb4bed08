//! Session configuration.
//!
//! One value object carries every timing knob of a session. Each field
//! defaults to the value that proved reliable on the bench; callers
//! override only what they need.

use {
    crate::{
        boot::BootConfig,
        error::{Error, Result},
        fuzz::FuzzConfig,
        monitor::MonitorConfig,
        port::SerialConfig,
        scan::ScanConfig,
    },
    std::time::Duration,
};

#[cfg(feature = "native")]
use crate::{channel::Channel, port::NativePort};

/// Everything a session needs, grouped by component.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Serial link parameters.
    pub port: SerialConfig,
    /// Boot handshake timing.
    pub boot: BootConfig,
    /// Orchestrator timing.
    pub fuzz: FuzzConfig,
    /// Register console timing.
    pub scan: ScanConfig,
    /// Freeze watchdog timing.
    pub monitor: MonitorConfig,
}

impl SessionConfig {
    /// Defaults for the given port.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: SerialConfig::new(port_name, baud_rate),
            ..Default::default()
        }
    }

    /// Replace the boot timing.
    #[must_use]
    pub fn with_boot(mut self, boot: BootConfig) -> Self {
        self.boot = boot;
        self
    }

    /// Replace the orchestrator timing.
    #[must_use]
    pub fn with_fuzz(mut self, fuzz: FuzzConfig) -> Self {
        self.fuzz = fuzz;
        self
    }

    /// Replace the scanner timing.
    #[must_use]
    pub fn with_scan(mut self, scan: ScanConfig) -> Self {
        self.scan = scan;
        self
    }

    /// Replace the watchdog timing.
    #[must_use]
    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    /// Reject combinations that cannot work.
    pub fn validate(&self) -> Result<()> {
        if self
            .port
            .port_name
            .is_empty()
        {
            return Err(Error::Config("no serial port given".into()));
        }
        if self
            .port
            .baud_rate
            == 0
        {
            return Err(Error::Config("baud rate must be non-zero".into()));
        }
        if self
            .boot
            .prompt_timeout
            .is_zero()
        {
            return Err(Error::Config("prompt timeout must be non-zero".into()));
        }
        if self
            .fuzz
            .response_window
            .is_zero()
        {
            return Err(Error::Config("response window must be non-zero".into()));
        }
        if self
            .scan
            .reply_timeout
            .is_zero()
        {
            return Err(Error::Config("reply timeout must be non-zero".into()));
        }
        if self.monitor.freeze_timeout < self.monitor.poll_interval {
            return Err(Error::Config(format!(
                "freeze timeout ({}ms) is shorter than the poll interval ({}ms)",
                self.monitor
                    .freeze_timeout
                    .as_millis(),
                self.monitor
                    .poll_interval
                    .as_millis()
            )));
        }
        Ok(())
    }

    /// Validate and open the serial port as a channel.
    #[cfg(feature = "native")]
    pub fn open(&self) -> Result<Channel<NativePort>> {
        self.validate()?;
        let port = NativePort::open(&self.port)?;
        Ok(Channel::new(port))
    }
}

/// Duration from a millisecond count, as stored in configuration files.
pub fn millis(value: u64) -> Duration {
    Duration::from_millis(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid_once_port_is_set() {
        assert!(matches!(SessionConfig::default().validate(), Err(Error::Config(_))));
        SessionConfig::new("/dev/ttyUSB0", 115200)
            .validate()
            .unwrap();
    }

    #[test]
    fn test_default_timings() {
        let config = SessionConfig::new("/dev/ttyUSB0", 115200);
        assert_eq!(config.boot.prompt_timeout, Duration::from_secs(20));
        assert_eq!(config.scan.reply_timeout, Duration::from_secs(1));
        assert_eq!(config.monitor.freeze_timeout, Duration::from_secs(5));
        assert_eq!(config.port.baud_rate, 115200);
    }

    #[test]
    fn test_millis_from_config_value() {
        assert_eq!(millis(1500), Duration::from_secs_f64(1.5));
        assert_eq!(millis(0), Duration::ZERO);
    }

    #[test]
    fn test_rejects_zero_baud() {
        let config = SessionConfig::new("/dev/ttyUSB0", 0);
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_watchdog_faster_than_poll() {
        let config = SessionConfig::new("/dev/ttyUSB0", 115200).with_monitor(MonitorConfig {
            freeze_timeout: millis(100),
            poll_interval: millis(500),
            pulse_width: millis(10),
        });
        let err = config
            .validate()
            .unwrap_err();
        assert!(
            err.to_string()
                .contains("poll interval")
        );
    }

    #[test]
    fn test_builders_replace_sections() {
        let config = SessionConfig::new("COM3", 9600).with_scan(ScanConfig {
            progress_every: 8,
            ..Default::default()
        });
        assert_eq!(config.scan.progress_every, 8);
        assert_eq!(config.port.port_name, "COM3");
    }
}
