//! Register console commands: scan, tweak, read, write, reset-probe and
//! overflow.

use {
    super::{Session, ensure_not_interrupted, open_session, progress_bar},
    crate::{Cli, CliError, ConsoleArgs, RangeArgs, config::Config},
    anyhow::{Context, Result},
    ateprobe::{
        RegisterMap, RegisterScanner,
        scan::{NO_RESPONSE, OVERFLOW_LENGTHS, REBOOT_SIGNATURE},
    },
    console::style,
    std::{ops::RangeInclusive, path::Path, time::Duration},
};

fn address_range(range: RangeArgs) -> Result<RangeInclusive<u8>> {
    if range.start > range.end {
        return Err(CliError::Usage(format!(
            "--start 0x{:02x} is past --end 0x{:02x}",
            range.start, range.end
        ))
        .into());
    }
    Ok(range.start..=range.end)
}

fn console_session(cli: &Cli, config: &Config, console: ConsoleArgs) -> Result<(Session, RegisterScanner)> {
    let session = open_session(cli, config, console.mode.into())?;
    ensure_not_interrupted()?;
    let scanner = RegisterScanner::new(
        session
            .config
            .scan
            .clone(),
    )?;
    Ok((session, scanner))
}

fn save_snapshot(cli: &Cli, map: &RegisterMap, output: &Path) -> Result<()> {
    map.save(output)
        .with_context(|| format!("Failed to write snapshot {}", output.display()))?;
    if !cli.quiet {
        eprintln!(
            "{} Saved {} registers ({} readable) to {}",
            style("✓").green(),
            map.len(),
            map.readable()
                .count(),
            style(output.display()).cyan()
        );
    }
    Ok(())
}

/// Scan command implementation.
pub(crate) fn cmd_scan(
    cli: &Cli,
    config: &Config,
    console: ConsoleArgs,
    range: RangeArgs,
    output: &Path,
) -> Result<()> {
    let range = address_range(range)?;
    let (mut session, scanner) = console_session(cli, config, console)?;

    let pb = progress_bar(
        cli,
        range
            .clone()
            .count() as u64,
    );
    let map = scanner.scan(&mut session.channel, range, &mut |done, _| {
        pb.set_position(done as u64);
    });
    pb.finish_and_clear();

    save_snapshot(cli, &map?, output)
}

/// Tweak-and-scan command implementation.
pub(crate) fn cmd_tweak(
    cli: &Cli,
    config: &Config,
    console: ConsoleArgs,
    range: RangeArgs,
    (register, value): (u8, u8),
    pause: Duration,
    output: &Path,
) -> Result<()> {
    let range = address_range(range)?;
    let (mut session, scanner) = console_session(cli, config, console)?;

    if !cli.quiet {
        eprintln!(
            "{} Writing 0x{value:02x} to register 0x{register:02x}",
            style("✎").cyan()
        );
    }

    let pb = progress_bar(
        cli,
        range
            .clone()
            .count() as u64,
    );
    let map = scanner.tweak_and_scan(
        &mut session.channel,
        register,
        value,
        pause,
        range,
        &mut |done, _| pb.set_position(done as u64),
    );
    pb.finish_and_clear();

    save_snapshot(cli, &map?, output)
}

/// Read command implementation.
pub(crate) fn cmd_read(cli: &Cli, config: &Config, console: ConsoleArgs, register: u8) -> Result<()> {
    let (mut session, scanner) = console_session(cli, config, console)?;
    let value = scanner.read_register(&mut session.channel, register)?;
    println!(
        "0x{register:02x}: {}",
        value
            .as_deref()
            .unwrap_or(NO_RESPONSE)
    );
    Ok(())
}

/// Write command implementation.
pub(crate) fn cmd_write(
    cli: &Cli,
    config: &Config,
    console: ConsoleArgs,
    register: u8,
    value: u8,
) -> Result<()> {
    let (mut session, scanner) = console_session(cli, config, console)?;
    let reply = scanner.write_register(&mut session.channel, register, value)?;
    if reply.is_empty() {
        if !cli.quiet {
            eprintln!("{} Written; no reply", style("✓").green());
        }
    } else {
        println!(
            "{}",
            String::from_utf8_lossy(&reply).trim()
        );
    }
    Ok(())
}

/// Soft-reset probe command implementation.
pub(crate) fn cmd_reset_probe(
    cli: &Cli,
    config: &Config,
    console: ConsoleArgs,
    register: u8,
    listen: Duration,
) -> Result<()> {
    let (mut session, scanner) = console_session(cli, config, console)?;
    let probe = scanner
        .probe_soft_reset(&mut session.channel, register, REBOOT_SIGNATURE, listen)?
        .ok_or_else(|| anyhow::anyhow!("Register 0x{register:02x} did not answer a read"))?;

    println!(
        "0x{register:02x}: 0x{:02x} -> 0x{:02x}: {}",
        probe.original,
        probe.written,
        if probe.rebooted {
            "REBOOT"
        } else {
            "no reboot"
        }
    );
    Ok(())
}

/// Summary of an overflow run.
pub(crate) fn describe_overflow(register: u8, crashed_at: Option<usize>) -> String {
    match crashed_at {
        Some(length) => format!("0x{register:02x}: no response at {length} bytes, possible crash"),
        None => format!("0x{register:02x}: every length answered"),
    }
}

/// Write-overflow command implementation.
pub(crate) fn cmd_overflow(cli: &Cli, config: &Config, console: ConsoleArgs, register: u8) -> Result<()> {
    let (mut session, scanner) = console_session(cli, config, console)?;
    if !cli.quiet {
        eprintln!(
            "{} Sending {} oversized writes to register 0x{register:02x}",
            style("✎").cyan(),
            OVERFLOW_LENGTHS.len()
        );
    }
    let crashed_at = scanner.write_overflow(&mut session.channel, register, &OVERFLOW_LENGTHS)?;
    println!("{}", describe_overflow(register, crashed_at));
    Ok(())
}
