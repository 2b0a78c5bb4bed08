//! ateprobe CLI - Command-line tool for probing undocumented UART
//! factory-test protocols.
//!
//! ## Features
//!
//! - Boot prompt synchronization into ATE, CMOS or bootloader modes
//! - Frame fuzzing with early exit on the first accepted frame
//! - Checksum discovery and bad-character search
//! - Bootloader memory-read sweeps with ESC-NUL recovery
//! - CMOS register scans, tweaks, soft-reset probes and overflow writes
//! - Offline snapshot diffing
//! - Environment variable support

use {
    anyhow::Result,
    clap::{Args, Parser, Subcommand, ValueEnum},
    console::style,
    env_logger::Env,
    log::debug,
    std::{
        env,
        path::PathBuf,
        process::ExitCode,
        sync::atomic::{AtomicBool, Ordering},
    },
};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation.
    #[error("{0}")]
    Usage(String),
    /// Bad configuration.
    #[error("{0}")]
    Config(String),
    /// The user cancelled.
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Config(_) => 3,
            Self::Cancelled(_) => 130,
        }
    }
}

/// Exit code for an error bubbled up from a command.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(cli) = cause.downcast_ref::<CliError>() {
            return cli.exit_code();
        }
        if let Some(lib) = cause.downcast_ref::<ateprobe::Error>() {
            return match lib {
                ateprobe::Error::Config(_) | ateprobe::Error::InvalidSnapshot(_) => 3,
                ateprobe::Error::PromptNotFound { .. } => 4,
                ateprobe::Error::Interrupted => 130,
                _ => 1,
            };
        }
    }
    1
}

/// ateprobe - Reverse-engineer the factory-test protocol of a UART device.
///
/// Environment variables:
///   ATEPROBE_PORT   - Default serial port
///   ATEPROBE_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "ateprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use.
    #[arg(short, long, global = true, env = "ATEPROBE_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(short, long, global = true, env = "ATEPROBE_BAUD")]
    baud: Option<u32>,

    /// Skip the boot handshake (device already in the target mode).
    #[arg(long, global = true)]
    no_sync: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Fuzz search spaces.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub(crate) enum Suite {
    /// Length, value, name and group sweeps.
    #[default]
    Standard,
    /// Every 2-byte payload.
    TwoByte,
    /// Seeded random payloads.
    Random,
    /// Every opcode with an empty payload.
    Opcodes,
    /// A 4 KiB cyclic pattern in chunks.
    Overflow,
}

/// CMOS console profiles.
#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub(crate) enum Profile {
    /// Daylight sensor profile.
    #[default]
    Day,
    /// Night sensor profile.
    Night,
}

impl From<Profile> for ateprobe::TargetMode {
    fn from(profile: Profile) -> Self {
        match profile {
            Profile::Day => Self::CmosDay,
            Profile::Night => Self::CmosNight,
        }
    }
}

/// Options shared by register console commands.
#[derive(Args, Clone, Copy, Debug)]
pub(crate) struct ConsoleArgs {
    /// Console profile to boot into.
    #[arg(long, value_enum, default_value_t = Profile::Day)]
    mode: Profile,
}

/// Address range of a scan.
#[derive(Args, Clone, Copy, Debug)]
pub(crate) struct RangeArgs {
    /// First register (hex).
    #[arg(long, value_parser = parse_hex_u8, default_value = "00")]
    start: u8,

    /// Last register (hex, inclusive).
    #[arg(long, value_parser = parse_hex_u8, default_value = "ff")]
    end: u8,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Fuzz the framed protocol until a frame is accepted.
    Fuzz {
        /// Opcode to fuzz (hex).
        #[arg(long, value_parser = parse_hex_u8, default_value = "0D")]
        opcode: u8,

        /// Search space.
        #[arg(long, value_enum, default_value_t = Suite::Standard)]
        suite: Suite,

        /// Seed for the random suite.
        #[arg(long)]
        seed: Option<u64>,

        /// Do not run the DTR freeze watchdog.
        #[arg(long)]
        no_monitor: bool,

        /// Send ESC NUL after three silent frames in a row.
        #[arg(long)]
        recover: bool,
    },

    /// Send one frame and classify the response.
    Send {
        /// Opcode (hex).
        #[arg(long, value_parser = parse_hex_u8)]
        opcode: u8,

        /// Payload bytes as hex (e.g. "00 41 01").
        #[arg(long, default_value = "")]
        payload: String,
    },

    /// Discover which checksum the device expects.
    Crc {
        /// Opcode of the checksummed family (hex).
        #[arg(long, value_parser = parse_hex_u8, default_value = "0D")]
        opcode: u8,

        /// Longest payload to try.
        #[arg(long, default_value_t = 32)]
        max_len: usize,

        /// Skip the 65536-value brute force.
        #[arg(long)]
        no_brute_force: bool,
    },

    /// Find payload bytes that change the device's response.
    Badchars {
        /// Opcode of the probe frame (hex).
        #[arg(long, value_parser = parse_hex_u8, default_value = "0D")]
        opcode: u8,

        /// Payload length.
        #[arg(long, default_value_t = 32)]
        length: usize,

        /// Index of the substituted byte.
        #[arg(long, default_value_t = 16)]
        position: usize,

        /// Do not send the trigger frame before each probe.
        #[arg(long)]
        no_trigger: bool,
    },

    /// Sweep the bootloader's memory-read command, with and without XOR.
    Memdump {
        /// Start address (hex).
        #[arg(long, value_parser = parse_hex_u32, default_value = "0")]
        addr: u32,

        /// Bytes requested per frame.
        #[arg(long, default_value_t = 0x20)]
        len: u16,

        /// Frames to send.
        #[arg(long, default_value_t = 256)]
        rounds: usize,

        /// Never send the ESC NUL recovery frame.
        #[arg(long)]
        no_recover: bool,
    },

    /// Scan CMOS registers into a JSON snapshot.
    Scan {
        #[command(flatten)]
        console: ConsoleArgs,

        #[command(flatten)]
        range: RangeArgs,

        /// Snapshot file to write.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write one register, then scan into a snapshot.
    Tweak {
        #[command(flatten)]
        console: ConsoleArgs,

        #[command(flatten)]
        range: RangeArgs,

        /// Register to write (hex).
        #[arg(long, value_parser = parse_hex_u8)]
        register: u8,

        /// Value to write (hex).
        #[arg(long, value_parser = parse_hex_u8)]
        value: u8,

        /// Seconds to wait after the write.
        #[arg(long, default_value_t = 1.0)]
        pause: f64,

        /// Snapshot file to write.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Read one register.
    Read {
        #[command(flatten)]
        console: ConsoleArgs,

        /// Register address (hex).
        #[arg(value_parser = parse_hex_u8)]
        register: u8,
    },

    /// Write one register.
    Write {
        #[command(flatten)]
        console: ConsoleArgs,

        /// Register address (hex).
        #[arg(value_parser = parse_hex_u8)]
        register: u8,

        /// Value (hex).
        #[arg(value_parser = parse_hex_u8)]
        value: u8,
    },

    /// Flip bit 0 of a register and listen for a reboot.
    ResetProbe {
        #[command(flatten)]
        console: ConsoleArgs,

        /// Register address (hex).
        #[arg(value_parser = parse_hex_u8)]
        register: u8,

        /// Seconds to listen for the reboot banner.
        #[arg(long, default_value_t = 10.0)]
        listen: f64,
    },

    /// Send oversized writes to a register until the console goes quiet.
    Overflow {
        #[command(flatten)]
        console: ConsoleArgs,

        /// Register address (hex).
        #[arg(value_parser = parse_hex_u8)]
        register: u8,
    },

    /// Compare register snapshots (offline).
    Diff {
        #[command(subcommand)]
        kind: DiffCommand,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },
}

/// Snapshot comparisons.
#[derive(Subcommand)]
enum DiffCommand {
    /// Split registers into stable and dynamic across two scans.
    Static {
        /// First snapshot.
        a: PathBuf,
        /// Second snapshot.
        b: PathBuf,
        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List registers changed by a tweak.
    Tweak {
        /// Snapshot before the tweak.
        baseline: PathBuf,
        /// Snapshot after the tweak.
        tweaked: PathBuf,
        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Baseline, alternate-profile and tweaked snapshots together.
    Triage {
        /// Baseline snapshot.
        baseline: PathBuf,
        /// Snapshot under the other profile.
        alternate: PathBuf,
        /// Snapshot after the tweak.
        tweaked: PathBuf,
        /// Output as JSON to stdout.
        #[arg(long)]
        json: bool,
    },
}

/// Parse a hex byte ("0D", "0x0d").
fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u8::from_str_radix(digits, 16).map_err(|e| format!("Invalid hex byte '{s}': {e}"))
}

/// Parse a hex address ("08001000", "0x0800_1000").
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let digits: String = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
        .chars()
        .filter(|&c| c != '_')
        .collect();
    u32::from_str_radix(&digits, 16).map_err(|e| format!("Invalid hex address '{s}': {e}"))
}

/// Parse a seconds value into a duration.
pub(crate) fn seconds(value: f64) -> Result<std::time::Duration> {
    std::time::Duration::try_from_secs_f64(value)
        .map_err(|e| CliError::Usage(format!("Invalid duration {value}: {e}")).into())
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        log::warn!("Could not install Ctrl-C handler: {e}");
    }
    ateprobe::set_interrupt_checker(was_interrupted);
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Fuzz {
            opcode,
            suite,
            seed,
            no_monitor,
            recover,
        } => commands::fuzz::cmd_fuzz(cli, &config, *opcode, *suite, *seed, *no_monitor, *recover),
        Commands::Send { opcode, payload } => commands::fuzz::cmd_send(cli, &config, *opcode, payload),
        Commands::Crc {
            opcode,
            max_len,
            no_brute_force,
        } => commands::fuzz::cmd_crc(cli, &config, *opcode, *max_len, !*no_brute_force),
        Commands::Badchars {
            opcode,
            length,
            position,
            no_trigger,
        } => commands::fuzz::cmd_badchars(cli, &config, *opcode, *length, *position, !*no_trigger),
        Commands::Memdump {
            addr,
            len,
            rounds,
            no_recover,
        } => commands::fuzz::cmd_memdump(cli, &config, *addr, *len, *rounds, !*no_recover),
        Commands::Scan {
            console,
            range,
            output,
        } => commands::scan::cmd_scan(cli, &config, *console, *range, output),
        Commands::Tweak {
            console,
            range,
            register,
            value,
            pause,
            output,
        } => commands::scan::cmd_tweak(
            cli,
            &config,
            *console,
            *range,
            (*register, *value),
            seconds(*pause)?,
            output,
        ),
        Commands::Read { console, register } => {
            commands::scan::cmd_read(cli, &config, *console, *register)
        },
        Commands::Write {
            console,
            register,
            value,
        } => commands::scan::cmd_write(cli, &config, *console, *register, *value),
        Commands::ResetProbe {
            console,
            register,
            listen,
        } => commands::scan::cmd_reset_probe(cli, &config, *console, *register, seconds(*listen)?),
        Commands::Overflow { console, register } => {
            commands::scan::cmd_overflow(cli, &config, *console, *register)
        },
        Commands::Diff { kind } => match kind {
            DiffCommand::Static { a, b, json } => commands::diff::cmd_diff_static(a, b, *json),
            DiffCommand::Tweak {
                baseline,
                tweaked,
                json,
            } => commands::diff::cmd_diff_tweak(baseline, tweaked, *json),
            DiffCommand::Triage {
                baseline,
                alternate,
                tweaked,
                json,
            } => commands::diff::cmd_diff_triage(baseline, alternate, tweaked, *json),
        },
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var_os("NO_COLOR").is_some() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);
    install_interrupt_handler();

    debug!(
        "ateprobe v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_hex_u8() {
        assert_eq!(parse_hex_u8("0D"), Ok(0x0D));
        assert_eq!(parse_hex_u8("0x72"), Ok(0x72));
        assert_eq!(parse_hex_u8("ff"), Ok(0xFF));
        assert!(parse_hex_u8("100").is_err());
        assert!(parse_hex_u8("zz").is_err());
    }

    #[test]
    fn test_parse_hex_u32() {
        assert_eq!(parse_hex_u32("0"), Ok(0));
        assert_eq!(parse_hex_u32("0x0800_1000"), Ok(0x0800_1000));
        assert_eq!(parse_hex_u32("FFFFFFFF"), Ok(u32::MAX));
        assert!(parse_hex_u32("100000000").is_err());
    }

    #[test]
    fn test_fuzz_recover_flag() {
        let cli = Cli::parse_from(["ateprobe", "fuzz", "--recover"]);
        assert!(matches!(cli.command, Commands::Fuzz { recover: true, .. }));
        let cli = Cli::parse_from(["ateprobe", "fuzz"]);
        assert!(matches!(cli.command, Commands::Fuzz { recover: false, .. }));
    }

    #[test]
    fn test_memdump_defaults() {
        let cli = Cli::parse_from(["ateprobe", "memdump"]);
        let Commands::Memdump {
            addr,
            len,
            rounds,
            no_recover,
        } = cli.command
        else {
            panic!("not a memdump command");
        };
        assert_eq!((addr, len, rounds, no_recover), (0, 0x20, 256, false));
    }

    #[test]
    fn test_exit_codes() {
        let usage: anyhow::Error = CliError::Usage("x".into()).into();
        assert_eq!(exit_code_for(&usage), 2);

        let config: anyhow::Error = ateprobe::Error::Config("x".into()).into();
        assert_eq!(exit_code_for(&config), 3);

        let prompt: anyhow::Error = ateprobe::Error::PromptNotFound {
            waited: std::time::Duration::from_secs(20),
        }
        .into();
        assert_eq!(exit_code_for(&prompt.context("boot handshake failed")), 4);

        let cancelled: anyhow::Error = ateprobe::Error::Interrupted.into();
        assert_eq!(exit_code_for(&cancelled), 130);

        assert_eq!(exit_code_for(&anyhow::anyhow!("boom")), 1);
    }

    #[test]
    fn test_profile_maps_to_mode() {
        assert_eq!(
            ateprobe::TargetMode::from(Profile::Night),
            ateprobe::TargetMode::CmosNight
        );
    }

    #[test]
    fn test_seconds_rejects_negative() {
        assert!(seconds(-1.0).is_err());
        assert_eq!(seconds(0.5).unwrap(), std::time::Duration::from_millis(500));
    }
}
