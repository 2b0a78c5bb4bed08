//! Binary command frame codec.
//!
//! Two frame families share the same outline and differ in preamble,
//! length-field byte order and trailer:
//!
//! ```text
//! Checksummed (opcode 0x0D):
//! +------+--------+----------+---------+--------------+------+
//! | 0x55 | opcode | len (BE) | payload | CRC16 (LE)   | 0x0D |
//! +------+--------+----------+---------+--------------+------+
//! |  1   |   1    |    2     |    N    |      2       |  1   |
//! +------+--------+----------+---------+--------------+------+
//!
//! Plain (every other opcode):
//! +-----------+--------+----------+---------+
//! | 0x55 0xAA | opcode | len (LE) | payload |
//! +-----------+--------+----------+---------+
//! |     2     |   1    |    2     |    N    |
//! +-----------+--------+----------+---------+
//! ```
//!
//! The CRC covers `opcode ++ len ++ payload`. The length field always
//! counts payload bytes only, trailer or not.

use {
    crate::{
        error::{Error, Result},
        protocol::checksum::ChecksumAlgorithm,
    },
    byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt},
    std::fmt::{self, Write as _},
};

/// Opcode of the checksummed command family.
pub const CHECKSUMMED_OPCODE: u8 = 0x0D;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

/// Byte order of the length field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Most significant byte first.
    Big,
    /// Least significant byte first.
    Little,
}

/// Wire layout of one opcode family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSpec {
    /// Leading sync bytes.
    pub preamble: &'static [u8],
    /// Byte order of the length field.
    pub length_endian: Endian,
    /// Checksum appended after the payload, if any.
    pub checksum: Option<ChecksumAlgorithm>,
    /// Trailing byte, if any.
    pub terminator: Option<u8>,
}

/// Layout used by opcode 0x0D.
pub const CHECKSUMMED: FrameSpec = FrameSpec {
    preamble: &[0x55],
    length_endian: Endian::Big,
    checksum: Some(ChecksumAlgorithm::Crc16Modbus),
    terminator: Some(0x0D),
};

/// Layout used by every other opcode.
pub const PLAIN: FrameSpec = FrameSpec {
    preamble: &[0x55, 0xAA],
    length_endian: Endian::Little,
    checksum: None,
    terminator: None,
};

impl FrameSpec {
    /// Look up the layout for an opcode.
    pub fn for_opcode(opcode: u8) -> &'static Self {
        if opcode == CHECKSUMMED_OPCODE {
            &CHECKSUMMED
        } else {
            &PLAIN
        }
    }

    /// Offset of the opcode byte.
    pub fn opcode_offset(&self) -> usize {
        self.preamble
            .len()
    }

    /// Bytes outside the payload.
    pub fn overhead(&self) -> usize {
        self.preamble
            .len()
            + 3
            + if self.checksum.is_some() { 2 } else { 0 }
            + usize::from(self.terminator.is_some())
    }
}

/// An encoded command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    opcode: u8,
    spec: &'static FrameSpec,
    bytes: Vec<u8>,
}

impl Frame {
    /// Encode a payload for an opcode using that opcode's family layout.
    pub fn encode(opcode: u8, payload: &[u8]) -> Result<Self> {
        Self::encode_with(FrameSpec::for_opcode(opcode), opcode, payload)
    }

    /// Encode under an explicit layout, regardless of the opcode's family.
    pub fn encode_with(spec: &'static FrameSpec, opcode: u8, payload: &[u8]) -> Result<Self> {
        let checksum = spec
            .checksum
            .map(|algo| algo.compute(&Self::region(spec, opcode, payload)));
        Self::assemble(opcode, spec, payload, checksum)
    }

    /// Build a checksummed-family frame with a caller-chosen checksum.
    ///
    /// Used when the trailer algorithm of a target is still being
    /// discovered; the value is appended low byte first.
    pub fn with_checksum(opcode: u8, payload: &[u8], checksum: u16) -> Result<Self> {
        Self::assemble(opcode, &CHECKSUMMED, payload, Some(checksum))
    }

    /// The bytes a checksummed-family trailer is computed over.
    pub fn checksum_region(opcode: u8, payload: &[u8]) -> Vec<u8> {
        Self::region(&CHECKSUMMED, opcode, payload)
    }

    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    #[allow(clippy::cast_possible_truncation)]
    fn region(spec: &FrameSpec, opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(3 + payload.len());
        buf.push(opcode);
        // Oversized payloads are rejected by `assemble`.
        let len = payload.len() as u16;
        match spec.length_endian {
            Endian::Big => buf.write_u16::<BigEndian>(len).unwrap(),
            Endian::Little => buf.write_u16::<LittleEndian>(len).unwrap(),
        }
        buf.extend_from_slice(payload);
        buf
    }

    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    fn assemble(
        opcode: u8,
        spec: &'static FrameSpec,
        payload: &[u8],
        checksum: Option<u16>,
    ) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLong {
                len: payload.len(),
            });
        }

        let mut bytes = Vec::with_capacity(spec.overhead() + payload.len());
        bytes.extend_from_slice(spec.preamble);
        bytes.extend_from_slice(&Self::region(spec, opcode, payload));
        if let Some(value) = checksum {
            bytes.write_u16::<LittleEndian>(value).unwrap();
        }
        if let Some(term) = spec.terminator {
            bytes.push(term);
        }

        Ok(Self {
            opcode,
            spec,
            bytes,
        })
    }

    /// Opcode byte.
    pub fn opcode(&self) -> u8 {
        self.opcode
    }

    /// Family layout this frame was encoded with.
    pub fn spec(&self) -> &'static FrameSpec {
        self.spec
    }

    /// Length field decoded under the family's byte order.
    pub fn length_field(&self) -> u16 {
        let at = self.spec.opcode_offset() + 1;
        let field = &self.bytes[at..at + 2];
        match self.spec.length_endian {
            Endian::Big => BigEndian::read_u16(field),
            Endian::Little => LittleEndian::read_u16(field),
        }
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        let start = self.spec.opcode_offset() + 3;
        &self.bytes[start..start + usize::from(self.length_field())]
    }

    /// Checksum trailer, if the family carries one.
    pub fn checksum(&self) -> Option<u16> {
        self.spec.checksum?;
        let at = self.spec.opcode_offset() + 3 + self.payload().len();
        Some(LittleEndian::read_u16(&self.bytes[at..at + 2]))
    }

    /// Raw wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consume the frame, returning its wire bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.bytes
            .len()
    }

    /// Whether the frame has no bytes. Never true for an encoded frame.
    pub fn is_empty(&self) -> bool {
        self.bytes
            .is_empty()
    }

    /// Space-separated uppercase hex rendering.
    pub fn hex(&self) -> String {
        hex_string(&self.bytes)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

/// Render bytes as `"55 0D 00 01"`.
pub fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes
        .iter()
        .enumerate()
    {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02X}");
    }
    out
}

/// Parse hex like `"55 aa 0d"`, `"55AA0D"` or `"0x55,0xaa"`.
pub fn parse_hex(text: &str) -> Result<Vec<u8>> {
    let digits: String = text
        .split(|c: char| c.is_whitespace() || c == ',' || c == ':')
        .map(|tok| {
            tok.strip_prefix("0x")
                .or_else(|| tok.strip_prefix("0X"))
                .unwrap_or(tok)
        })
        .collect();

    if !digits.is_ascii() {
        return Err(Error::Config(format!("non-hex characters in {text:?}")));
    }
    if digits.len() % 2 != 0 {
        return Err(Error::Config(format!("odd number of hex digits in {text:?}")));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| Error::Config(format!("invalid hex byte {:?}", &digits[i..i + 2])))
        })
        .collect()
}
