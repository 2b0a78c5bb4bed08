//! Checksum functions used by the framed command protocol.
//!
//! The checksummed frame family carries CRC-16/MODBUS. The other algorithms
//! are candidates tried during checksum discovery, when the trailer format of
//! a new target is still unknown.

use std::fmt;

/// CRC-16/MODBUS: reflected polynomial 0xA001, init 0xFFFF, no final XOR.
pub fn crc16_modbus(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// CRC-16/CCITT-FALSE: polynomial 0x1021, init 0xFFFF, MSB first.
pub fn crc16_ccitt(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Byte sum modulo 256.
pub fn sum8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

/// Byte sum modulo 65536.
pub fn sum16(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// XOR of every byte, as appended by the loader's memory-read frame.
pub fn crc8_xor(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |acc, &b| acc ^ b)
}

/// Named checksum candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecksumAlgorithm {
    /// 8-bit sum, zero-extended.
    Sum8,
    /// 16-bit sum, appended low byte first.
    Sum16Le,
    /// 16-bit sum with its bytes swapped.
    Sum16Be,
    /// CRC-16/MODBUS.
    Crc16Modbus,
    /// CRC-16/CCITT-FALSE.
    Crc16Ccitt,
}

impl ChecksumAlgorithm {
    /// Every candidate, in the order discovery tries them.
    pub const ALL: [Self; 5] = [
        Self::Sum8,
        Self::Sum16Le,
        Self::Sum16Be,
        Self::Crc16Modbus,
        Self::Crc16Ccitt,
    ];

    /// Short display name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum8 => "SUM8",
            Self::Sum16Le => "SUM16-LE",
            Self::Sum16Be => "SUM16-BE",
            Self::Crc16Modbus => "CRC16-MODBUS",
            Self::Crc16Ccitt => "CRC16-CCITT",
        }
    }

    /// Compute the 16-bit trailer value.
    ///
    /// Frames always append the value low byte first, so `Sum16Be` returns
    /// the byte-swapped sum to put the high byte on the wire first.
    pub fn compute(self, data: &[u8]) -> u16 {
        match self {
            Self::Sum8 => u16::from(sum8(data)),
            Self::Sum16Le => sum16(data),
            Self::Sum16Be => sum16(data).swap_bytes(),
            Self::Crc16Modbus => crc16_modbus(data),
            Self::Crc16Ccitt => crc16_ccitt(data),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}
