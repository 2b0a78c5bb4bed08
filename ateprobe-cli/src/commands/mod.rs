//! Command implementations.
//!
//! Each group of subcommands lives in its own module. This module holds
//! the session plumbing they share.

pub(crate) mod diff;
pub(crate) mod fuzz;
pub(crate) mod ports;
pub(crate) mod scan;

use {
    crate::{Cli, CliError, config::Config, use_fancy_output},
    anyhow::{Context, Result},
    ateprobe::{
        BootSynchronizer, Channel, LivenessMonitor, NativePort, SessionConfig, SessionState,
        TargetMode,
    },
    console::style,
    indicatif::{ProgressBar, ProgressStyle},
};

/// Baud rate when neither the CLI nor the config sets one.
pub(crate) const DEFAULT_BAUD: u32 = 115_200;

/// An open, synchronized device.
pub(crate) struct Session {
    pub(crate) channel: Channel<NativePort>,
    pub(crate) config: SessionConfig,
}

impl Session {
    /// Start the DTR watchdog on this session's channel.
    pub(crate) fn start_monitor(&self) -> Result<LivenessMonitor> {
        let control = self
            .channel
            .control_line()
            .context("Failed to open a DTR control handle")?;
        Ok(LivenessMonitor::spawn(
            self.channel
                .clock(),
            control,
            self.config
                .monitor
                .clone(),
        )?)
    }
}

/// Resolve port and baud from CLI, environment and config files.
pub(crate) fn session_config(cli: &Cli, config: &Config) -> Result<SessionConfig> {
    let port = cli
        .port
        .clone()
        .or_else(|| {
            config
                .connection
                .port
                .clone()
        })
        .ok_or_else(|| {
            CliError::Usage("No serial port given; use --port or set ATEPROBE_PORT".into())
        })?;
    let baud = cli
        .baud
        .or(config
            .connection
            .baud)
        .unwrap_or(DEFAULT_BAUD);
    if baud == 0 {
        return Err(CliError::Config("Baud rate must be non-zero".into()).into());
    }
    Ok(config.session(&port, baud))
}

/// Open the port and run the boot handshake into `mode`.
pub(crate) fn open_session(cli: &Cli, config: &Config, mode: TargetMode) -> Result<Session> {
    let session = session_config(cli, config)?;
    let port_name = session
        .port
        .port_name
        .clone();

    if !cli.quiet {
        eprintln!(
            "{} Using {} @ {} baud",
            style("🔌").cyan(),
            port_name,
            session
                .port
                .baud_rate
        );
    }

    let mut channel = session
        .open()
        .with_context(|| format!("Failed to open {port_name}"))?;

    if cli.no_sync {
        if !cli.quiet {
            eprintln!(
                "{} Skipping boot handshake; assuming {mode} mode",
                style("ℹ").blue()
            );
        }
    } else {
        if !cli.quiet {
            eprintln!(
                "{} Waiting for the boot prompt; power-cycle the device now",
                style("⏳").yellow()
            );
        }
        let state = BootSynchronizer::new(
            session
                .boot
                .clone(),
        )
        .synchronize(&mut channel, mode)
        .context("Boot handshake failed")?;

        if !cli.quiet {
            match state {
                SessionState::Ready => {
                    eprintln!("{} Device is in {mode} mode", style("✓").green());
                },
                _ => eprintln!(
                    "{} No {mode} banner seen; continuing anyway",
                    style("⚠").yellow()
                ),
            }
        }
    }

    Ok(Session {
        channel,
        config: session,
    })
}

/// Progress bar on stderr, hidden when quiet or not a terminal.
pub(crate) fn progress_bar(cli: &Cli, total: u64) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(total);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb
}

/// Fail with a cancellation error if Ctrl-C was pressed.
pub(crate) fn ensure_not_interrupted() -> Result<()> {
    if crate::was_interrupted() {
        Err(CliError::Cancelled("Interrupted by user".into()).into())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_port_from_cli_wins_over_config() {
        let cli = Cli::parse_from(["ateprobe", "-p", "/dev/ttyUSB9", "list-ports"]);
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyUSB0".into());
        config.connection.baud = Some(57600);

        let session = session_config(&cli, &config).unwrap();
        assert_eq!(session.port.port_name, "/dev/ttyUSB9");
        assert_eq!(session.port.baud_rate, 57600);
    }

    #[test]
    fn test_missing_port_is_usage_error() {
        let cli = Cli::parse_from(["ateprobe", "list-ports"]);
        if cli.port.is_some() {
            // ATEPROBE_PORT is set in this environment
            return;
        }
        let err = session_config(&cli, &Config::default())
            .err()
            .unwrap();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_))));
    }

    #[test]
    fn test_zero_baud_is_config_error() {
        let cli = Cli::parse_from(["ateprobe", "-p", "COM3", "-b", "0", "list-ports"]);
        let err = session_config(&cli, &Config::default())
            .err()
            .unwrap();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Config(_))));
    }

    #[test]
    fn test_default_baud() {
        let cli = Cli::parse_from(["ateprobe", "-p", "COM3", "list-ports"]);
        if cli.baud.is_some() {
            return;
        }
        let session = session_config(&cli, &Config::default()).unwrap();
        assert_eq!(session.port.baud_rate, DEFAULT_BAUD);
    }
}
