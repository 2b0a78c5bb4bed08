//! Register console: command encoding, snapshots and the scanner.

pub mod command;
pub mod map;
pub mod scanner;

pub use {
    command::{REPLY_PATTERN, RegisterCommand, ReplyParser, parse_value},
    map::{NO_RESPONSE, RegisterMap, RegisterValue},
    scanner::{OVERFLOW_LENGTHS, REBOOT_SIGNATURE, RegisterScanner, ResetProbe, ScanConfig},
};
