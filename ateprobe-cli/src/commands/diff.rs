//! Offline snapshot comparison commands.

use {
    anyhow::{Context, Result},
    ateprobe::{RegisterChange, RegisterMap, StaticDiff, TriageReport, diff_static, diff_tweak},
    serde::Serialize,
    std::{fmt::Write as _, path::Path},
};

fn load(path: &Path) -> Result<RegisterMap> {
    RegisterMap::load(path).with_context(|| format!("Failed to load snapshot {}", path.display()))
}

fn print_json<T: Serialize>(data: &T) -> Result<()> {
    let output = serde_json::json!({
        "ok": true,
        "data": data,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn address_list(addrs: &[u8]) -> String {
    if addrs.is_empty() {
        return "-".to_string();
    }
    addrs
        .iter()
        .map(|a| format!("0x{a:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable partition.
#[allow(clippy::unwrap_used)] // Writing to String cannot fail
pub(crate) fn render_static(diff: &StaticDiff) -> String {
    let mut out = String::new();
    for (label, addrs) in [
        ("stable", &diff.stable),
        ("dynamic", &diff.dynamic),
        ("excluded", &diff.excluded),
    ] {
        writeln!(out, "{label:<8} ({:3}): {}", addrs.len(), address_list(addrs)).unwrap();
    }
    out
}

/// Human-readable change list.
pub(crate) fn render_changes(changes: &[RegisterChange]) -> String {
    if changes.is_empty() {
        return "no registers changed\n".to_string();
    }
    changes
        .iter()
        .map(|c| format!("0x{:02x}: {} -> {}\n", c.addr, c.old, c.new))
        .collect()
}

/// `diff static` implementation.
pub(crate) fn cmd_diff_static(a: &Path, b: &Path, json: bool) -> Result<()> {
    let diff = diff_static(&load(a)?, &load(b)?);
    if json {
        return print_json(&diff);
    }
    print!("{}", render_static(&diff));
    Ok(())
}

/// `diff tweak` implementation.
pub(crate) fn cmd_diff_tweak(baseline: &Path, tweaked: &Path, json: bool) -> Result<()> {
    let changes = diff_tweak(&load(baseline)?, &load(tweaked)?);
    if json {
        return print_json(&changes);
    }
    print!("{}", render_changes(&changes));
    Ok(())
}

/// `diff triage` implementation.
pub(crate) fn cmd_diff_triage(
    baseline: &Path,
    alternate: &Path,
    tweaked: &Path,
    json: bool,
) -> Result<()> {
    let report = TriageReport::build(&load(baseline)?, &load(alternate)?, &load(tweaked)?);
    if json {
        return print_json(&report);
    }

    print!(
        "{}",
        render_static(&StaticDiff {
            stable: report
                .static_candidates
                .clone(),
            dynamic: report
                .dynamic
                .clone(),
            excluded: report
                .excluded
                .clone(),
        })
    );
    println!();
    if report.is_silent_tweak() {
        println!("tweak changed nothing observable");
        return Ok(());
    }
    print!("{}", render_changes(&report.tweak_changes));

    let attributable: Vec<u8> = report
        .attributable_changes()
        .map(|c| c.addr)
        .collect();
    println!("attributable: {}", address_list(&attributable));
    Ok(())
}
