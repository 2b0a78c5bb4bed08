//! Text sub-protocol of the register console.
//!
//! ```text
//! read : "00" aa "00" CR   ->  ... Addr:0xaa, Data:0xvv ...
//! write: "01" aa vv  CR    ->  (reply optional)
//! fill : "01" aa "41"*n CR  ->  oversized write, silence hints at a crash
//! ```
//!
//! The console echoes each command before answering, so replies are found
//! by pattern rather than by position.

use {
    crate::error::{Error, Result},
    regex::Regex,
};

/// Pattern of a read reply. Group 1 is the address, group 2 the value.
pub const REPLY_PATTERN: &str = r"(?i)Addr:0x([0-9a-f]+),\s*Data:(0x[0-9a-f]+)";

/// A register console command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterCommand {
    /// Read one register.
    Read(u8),
    /// Write a value to one register.
    Write(u8, u8),
    /// Write with `n` repetitions of the data byte `0x41`, past the two
    /// hex digits the console expects.
    Overflow(u8, usize),
}

impl RegisterCommand {
    /// Register address.
    pub fn address(self) -> u8 {
        match self {
            Self::Read(addr) | Self::Write(addr, _) | Self::Overflow(addr, _) => addr,
        }
    }

    /// Wire bytes, lowercase hex terminated by CR.
    pub fn encode(self) -> Vec<u8> {
        match self {
            Self::Read(addr) => format!("00{addr:02x}00\r"),
            Self::Write(addr, value) => format!("01{addr:02x}{value:02x}\r"),
            Self::Overflow(addr, count) => format!("01{addr:02x}{}\r", "41".repeat(count)),
        }
        .into_bytes()
    }
}

/// Extracts register values from console output.
#[derive(Debug, Clone)]
pub struct ReplyParser {
    pattern: Regex,
}

impl ReplyParser {
    /// Parser for [`REPLY_PATTERN`].
    pub fn new() -> Result<Self> {
        Self::with_pattern(REPLY_PATTERN)
    }

    /// Parser for a custom pattern with the same two groups.
    pub fn with_pattern(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| Error::Config(format!("invalid reply pattern: {e}")))?;
        Ok(Self { pattern })
    }

    /// Value reported for `addr`, as printed (e.g. `"0x1f"`).
    ///
    /// Replies for other addresses are ignored, so a stale answer from a
    /// previous read cannot be attributed to this one.
    pub fn parse(&self, text: &str, addr: u8) -> Option<String> {
        self.pattern
            .captures_iter(text)
            .find(|caps| {
                u32::from_str_radix(&caps[1], 16).is_ok_and(|reported| reported == u32::from(addr))
            })
            .map(|caps| caps[2].to_string())
    }
}

/// Numeric value of a reply string such as `"0x1f"`.
pub fn parse_value(text: &str) -> Option<u32> {
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    u32::from_str_radix(digits, 16).ok()
}
