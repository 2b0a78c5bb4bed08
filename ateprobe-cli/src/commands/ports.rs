//! Port listing command implementation.

use {
    anyhow::Result,
    ateprobe::{NativePortEnumerator, PortEnumerator, PortInfo},
    console::style,
};

fn port_json(port: &PortInfo) -> serde_json::Value {
    serde_json::json!({
        "name": port.name,
        "vid": port.vid,
        "pid": port.pid,
        "manufacturer": port.manufacturer,
        "product": port.product,
    })
}

/// List ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = NativePortEnumerator::list_ports()?;

    if json {
        let output = serde_json::json!({
            "ok": true,
            "data": {
                "ports": ports.iter().map(port_json).collect::<Vec<_>>(),
            }
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    eprintln!(
        "{}",
        style("Available serial ports:")
            .bold()
            .underlined()
    );

    if ports.is_empty() {
        eprintln!("  {}", style("(none found)").dim());
        return Ok(());
    }

    for port in &ports {
        let vid_pid = if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" ({vid:04X}:{pid:04X})")
        } else {
            String::new()
        };
        let product = port
            .product
            .as_deref()
            .map(|p| format!(" - {}", style(p).dim()))
            .unwrap_or_default();

        eprintln!(
            "  {} {}{}{}",
            style("•").green(),
            style(&port.name).cyan(),
            vid_pid,
            product
        );
    }
    Ok(())
}
