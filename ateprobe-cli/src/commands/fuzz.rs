//! Framed-protocol commands: fuzz, send, crc, badchars and the loader
//! memory-read sweep.

use {
    super::{ensure_not_interrupted, open_session, progress_bar},
    crate::{Cli, CliError, Suite, config::Config},
    anyhow::{Context, Result},
    ateprobe::{
        BadCharConfig, ChecksumDiscovery, Classification, FuzzModule, FuzzOrchestrator,
        LivenessMonitor, ProbeEvent, TargetMode, classify, find_bad_chars,
        fuzz::{
            BruteForce, ChecksumFinding, MemDumpConfig, MemDumpReply, Recovery, exchange,
            module::DEFAULT_SETTLE, sweep_memdump,
        },
        protocol::{Frame, hex_string, parse_hex},
    },
    console::style,
};

/// Length of the overflow pattern.
pub(crate) const OVERFLOW_LEN: usize = 4096;

/// Modules that make up a suite.
pub(crate) fn suite_modules(suite: Suite, opcode: u8, seed: u64) -> Vec<FuzzModule> {
    match suite {
        Suite::Standard => FuzzModule::standard_suite(opcode),
        Suite::TwoByte => vec![FuzzModule::two_byte(opcode)],
        Suite::Random => vec![FuzzModule::random(opcode, seed)],
        Suite::Opcodes => vec![FuzzModule::opcode_sweep(0x00..=0xFF)],
        Suite::Overflow => vec![FuzzModule::overflow(opcode, OVERFLOW_LEN)],
    }
}

/// One line for a classified frame.
pub(crate) fn describe_outcome(
    module: &str,
    index: usize,
    frame: &Frame,
    classification: Classification,
    response: &[u8],
) -> String {
    if response.is_empty() {
        format!("[{module} #{index}] {frame} -> {classification}")
    } else {
        format!(
            "[{module} #{index}] {frame} -> {classification} {:?}",
            String::from_utf8_lossy(response)
        )
    }
}

/// Fuzz command implementation.
pub(crate) fn cmd_fuzz(
    cli: &Cli,
    config: &Config,
    opcode: u8,
    suite: Suite,
    seed: Option<u64>,
    no_monitor: bool,
    recover: bool,
) -> Result<()> {
    let mut session = open_session(cli, config, TargetMode::Ate)?;
    ensure_not_interrupted()?;

    let seed = seed.unwrap_or(
        session
            .config
            .fuzz
            .seed,
    );
    let modules = suite_modules(suite, opcode, seed);
    let total: usize = modules
        .iter()
        .map(FuzzModule::len)
        .sum();

    if !cli.quiet {
        eprintln!(
            "{} {} modules, {} candidates, opcode 0x{opcode:02X}",
            style("ℹ").blue(),
            modules.len(),
            total
        );
    }

    let monitor = if no_monitor {
        None
    } else {
        Some(session.start_monitor()?)
    };

    let mut fuzz = session
        .config
        .fuzz
        .clone();
    if recover {
        fuzz.recovery = Some(Recovery::escape_nul());
    }

    let pb = progress_bar(cli, total as u64);
    let mut orchestrator = FuzzOrchestrator::new(fuzz);
    let result = orchestrator.run(&mut session.channel, &modules, &mut |event| match event {
        ProbeEvent::ModuleStarted { module, .. } => pb.set_message(module.to_string()),
        ProbeEvent::Probe {
            module,
            index,
            frame,
            response,
            classification,
        } => {
            let line = describe_outcome(module, *index, frame, *classification, response);
            pb.suspend(|| println!("{line}"));
            pb.inc(1);
        },
        ProbeEvent::SilenceStreak { module, count } => pb.suspend(|| {
            eprintln!(
                "{} {count} silent probes in a row during {module}",
                style("⚠").yellow()
            );
        }),
        ProbeEvent::Recovery { module, after } => pb.suspend(|| {
            eprintln!(
                "{} Sent recovery frame after {after} silent frames during {module}",
                style("⚠").yellow()
            );
        }),
        _ => {},
    });
    pb.finish_and_clear();

    let recoveries = monitor.map_or(0, LivenessMonitor::stop);
    if recoveries > 0 && !cli.quiet {
        eprintln!(
            "{} Watchdog recovered the device {recoveries} time(s)",
            style("⚠").yellow()
        );
    }

    match result? {
        Some(found) => {
            if !cli.quiet {
                eprintln!(
                    "{} Accepted after {} probes",
                    style("🎉").green().bold(),
                    orchestrator.probes()
                );
            }
            println!("module:   {}", found.module);
            println!("frame:    {}", found.frame);
            println!("response: {:?}", String::from_utf8_lossy(&found.response));
        },
        None => {
            if !cli.quiet {
                eprintln!(
                    "{} No frame accepted in {} probes",
                    style("✗").red(),
                    orchestrator.probes()
                );
            }
        },
    }

    Ok(())
}

/// Send command implementation.
pub(crate) fn cmd_send(cli: &Cli, config: &Config, opcode: u8, payload: &str) -> Result<()> {
    let payload = parse_hex(payload).map_err(|e| CliError::Usage(format!("Invalid --payload: {e}")))?;
    let frame = Frame::encode(opcode, &payload)?;

    let mut session = open_session(cli, config, TargetMode::Ate)?;
    let response = exchange(
        &mut session.channel,
        &frame,
        DEFAULT_SETTLE,
        session
            .config
            .fuzz
            .response_window,
    )?;

    println!("sent:     {frame}");
    println!("class:    {}", classify(&response));
    println!("response: {:?}", String::from_utf8_lossy(&response));
    if !response.is_empty() {
        println!("hex:      {}", hex_string(&response));
    }
    Ok(())
}

/// One line summarizing a checksum finding.
pub(crate) fn describe_finding(finding: &ChecksumFinding) -> String {
    let accepted: Vec<String> = finding
        .accepted_trials()
        .map(|t| format!("{} over {}", t.algorithm, t.coverage))
        .collect();
    if !accepted.is_empty() {
        return format!("len {:2}: accepted {}", finding.length, accepted.join(", "));
    }
    match finding.brute_force {
        BruteForce::Found(value) => {
            format!("len {:2}: brute force found 0x{value:04X}", finding.length)
        },
        BruteForce::Rejected => format!("len {:2}: every checksum rejected", finding.length),
        BruteForce::Skipped => format!("len {:2}: no named algorithm accepted", finding.length),
    }
}

/// Whether some trailer was accepted at this length.
pub(crate) fn is_solved(finding: &ChecksumFinding) -> bool {
    !finding
        .accepted()
        .is_empty()
        || matches!(finding.brute_force, BruteForce::Found(_))
}

/// Checksum discovery command implementation.
pub(crate) fn cmd_crc(
    cli: &Cli,
    config: &Config,
    opcode: u8,
    max_len: usize,
    brute_force: bool,
) -> Result<()> {
    if max_len == 0 {
        return Err(CliError::Usage("--max-len must be at least 1".into()).into());
    }

    let mut session = open_session(cli, config, TargetMode::Ate)?;
    let discovery = ChecksumDiscovery::new(opcode)
        .with_max_len(max_len)
        .with_brute_force(brute_force)
        .with_inter_frame_delay(
            session
                .config
                .fuzz
                .inter_frame_delay,
        );

    let findings = discovery
        .run(&mut session.channel, &mut |finding| {
            println!("{}", describe_finding(finding));
        })
        .context("Checksum discovery stopped")?;

    let solved = findings
        .iter()
        .filter(|f| is_solved(f))
        .count();
    if !cli.quiet {
        eprintln!(
            "{} {solved} of {} lengths produced an accepted checksum",
            style("ℹ").blue(),
            findings.len()
        );
    }
    Ok(())
}

/// Bad-character search command implementation.
pub(crate) fn cmd_badchars(
    cli: &Cli,
    config: &Config,
    opcode: u8,
    length: usize,
    position: usize,
    trigger: bool,
) -> Result<()> {
    if position >= length {
        return Err(CliError::Usage(format!(
            "--position {position} is outside a {length}-byte payload"
        ))
        .into());
    }

    let mut session = open_session(cli, config, TargetMode::Ate)?;
    let search = BadCharConfig {
        opcode,
        length,
        position,
        trigger: if trigger {
            BadCharConfig::default().trigger
        } else {
            None
        },
        inter_frame_delay: session
            .config
            .fuzz
            .inter_frame_delay,
        ..BadCharConfig::default()
    };

    let report = find_bad_chars(&mut session.channel, &search, &mut |bad| {
        println!(
            "0x{:02X}: {:?}",
            bad.value,
            String::from_utf8_lossy(&bad.response)
        );
    })?;

    if !cli.quiet {
        let values: Vec<String> = report
            .bad
            .iter()
            .map(|b| format!("0x{:02X}", b.value))
            .collect();
        eprintln!(
            "{} {} bad characters{}{}",
            style("ℹ").blue(),
            values.len(),
            if values.is_empty() { "" } else { ": " },
            values.join(" ")
        );
    }
    Ok(())
}

/// One line for an answered memory read.
pub(crate) fn describe_reply(reply: &MemDumpReply) -> String {
    format!(
        "#{:3} {:5} {} -> {}",
        reply.round,
        if reply.with_crc { "+CRC" } else { "noCRC" },
        hex_string(&reply.frame),
        hex_string(&reply.response)
    )
}

/// Loader memory-read sweep command implementation.
pub(crate) fn cmd_memdump(
    cli: &Cli,
    config: &Config,
    addr: u32,
    len: u16,
    rounds: usize,
    recover: bool,
) -> Result<()> {
    if rounds == 0 {
        return Err(CliError::Usage("--rounds must be at least 1".into()).into());
    }

    let mut session = open_session(cli, config, TargetMode::Loader)?;
    ensure_not_interrupted()?;
    let sweep = MemDumpConfig {
        addr,
        len,
        rounds,
        inter_frame_delay: session
            .config
            .fuzz
            .inter_frame_delay,
        recovery: recover.then(Recovery::escape_nul),
        ..MemDumpConfig::default()
    };

    let pb = progress_bar(cli, rounds as u64);
    let report = sweep_memdump(&mut session.channel, &sweep, &mut |reply| {
        let line = describe_reply(reply);
        pb.suspend(|| println!("{line}"));
        pb.set_position(reply.round as u64 + 1);
    });
    pb.finish_and_clear();
    let report = report.context("Memory read sweep stopped")?;

    if !cli.quiet {
        eprintln!(
            "{} {} of {} frames answered, {} recoveries",
            style("ℹ").blue(),
            report
                .replies
                .len(),
            report.sent,
            report.recoveries
        );
    }
    Ok(())
}
