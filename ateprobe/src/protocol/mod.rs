//! Framed command protocol: checksums, frame codec and response classifier.

pub mod checksum;
pub mod classify;
pub mod frame;

// Re-export common types
pub use {
    checksum::{ChecksumAlgorithm, crc8_xor, crc16_ccitt, crc16_modbus, sum8, sum16},
    classify::{Classification, Classifier, classify},
    frame::{CHECKSUMMED, Endian, Frame, FrameSpec, PLAIN, hex_string, parse_hex},
};
