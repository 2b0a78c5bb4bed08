//! Fuzz modules: named, ordered generators of candidate payloads.
//!
//! Every module is one [`Generator`] plus the opcode it targets. The
//! canonical suite varies one dimension of a three-byte
//! `group | parameter | value` payload at a time.

use {
    crate::{fuzz::pattern::cyclic_pattern, protocol::Frame},
    rand::{Rng, SeedableRng, rngs::StdRng},
    std::{ops::RangeInclusive, time::Duration},
};

/// Delay between a write and the response read.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(1100);

/// Overflow chunk size; the largest that fits a one-byte length.
pub const OVERFLOW_CHUNK: usize = 0xFE;

/// Payload lengths of the random module.
pub const RANDOM_LENGTHS: &[usize] = &[0, 1, 2, 4, 8, 16, 32, 64, 128];

/// Trials per length of the random module.
pub const RANDOM_TRIALS: usize = 8;

/// Group byte of the canonical base payload.
pub const BASE_GROUP: u8 = 0x00;

/// Parameter byte of the canonical base payload (`'A'`).
pub const BASE_PARAMETER: u8 = 0x41;

/// Fixed value byte used while sweeping names and groups.
pub const BASE_VALUE: u8 = 0x01;

/// A payload with one free byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadTemplate {
    bytes: Vec<u8>,
    slot: usize,
}

impl PayloadTemplate {
    /// Template over `bytes` whose byte at `slot` is replaced per candidate.
    ///
    /// A slot past the end zero-pads the template up to it.
    pub fn new(bytes: impl Into<Vec<u8>>, slot: usize) -> Self {
        let mut bytes = bytes.into();
        if bytes.len() <= slot {
            bytes.resize(slot + 1, 0);
        }
        Self { bytes, slot }
    }

    /// Index of the free byte.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Concrete payload with `value` in the slot.
    pub fn fill(&self, value: u8) -> Vec<u8> {
        let mut payload = self
            .bytes
            .clone();
        payload[self.slot] = value;
        payload
    }
}

/// One probe to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Opcode byte.
    pub opcode: u8,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

/// How a module enumerates its candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Generator {
    /// `base` followed by `n` zero bytes, for each `n` in `pad`.
    Length {
        /// Leading bytes.
        base: Vec<u8>,
        /// Zero-pad counts, ascending.
        pad: std::ops::Range<usize>,
    },
    /// Every value in `values` placed into the template's slot.
    Slot {
        /// Payload with one free byte.
        template: PayloadTemplate,
        /// Values substituted into the slot.
        values: RangeInclusive<u8>,
    },
    /// `trials` random payloads of each length, from a seeded generator.
    Random {
        /// Payload lengths, in order.
        lengths: Vec<usize>,
        /// Payloads per length.
        trials: usize,
        /// Generator seed; equal seeds give equal runs.
        seed: u64,
    },
    /// Every big-endian value of a one- or two-byte payload.
    Exhaustive {
        /// Payload width in bytes, 1 or 2.
        width: u8,
    },
    /// Every opcode in a range with an empty payload.
    OpcodeSweep {
        /// Opcodes to try.
        opcodes: RangeInclusive<u8>,
    },
    /// An explicit list of payloads.
    Fixed {
        /// Payloads, in order.
        payloads: Vec<Vec<u8>>,
    },
}

/// A named generator bound to a target opcode.
#[derive(Debug, Clone)]
pub struct FuzzModule {
    /// Display name.
    pub name: String,
    /// Target opcode. Ignored by `OpcodeSweep`.
    pub opcode: u8,
    /// Candidate enumeration.
    pub generator: Generator,
    /// Delay between write and response read.
    pub settle: Duration,
    /// Frame sent (and its reply drained) before every probe.
    pub prelude: Option<Frame>,
}

impl FuzzModule {
    /// Module with the default settle delay and no prelude.
    pub fn new(name: impl Into<String>, opcode: u8, generator: Generator) -> Self {
        Self {
            name: name.into(),
            opcode,
            generator,
            settle: DEFAULT_SETTLE,
            prelude: None,
        }
    }

    /// Override the settle delay.
    #[must_use]
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// Send `frame` before every probe of this module.
    #[must_use]
    pub fn with_prelude(mut self, frame: Frame) -> Self {
        self.prelude = Some(frame);
        self
    }

    /// Base payload grown by 0..15 trailing zero bytes.
    pub fn payload_length(opcode: u8) -> Self {
        Self::new(
            "payload-length",
            opcode,
            Generator::Length {
                base: vec![BASE_GROUP, BASE_PARAMETER],
                pad: 0..15,
            },
        )
    }

    /// `group | 'A' | value` for every value.
    pub fn parameter_value(opcode: u8) -> Self {
        Self::new(
            "parameter-value",
            opcode,
            Generator::Slot {
                template: PayloadTemplate::new([BASE_GROUP, BASE_PARAMETER, 0], 2),
                values: 0..=0xFF,
            },
        )
    }

    /// `group | name | 0x01` for every printable ASCII name.
    pub fn parameter_name(opcode: u8) -> Self {
        Self::new(
            "parameter-name",
            opcode,
            Generator::Slot {
                template: PayloadTemplate::new([BASE_GROUP, 0, BASE_VALUE], 1),
                values: 0x20..=0x7E,
            },
        )
    }

    /// `group | 'A' | 0x01` for every group.
    pub fn group_id(opcode: u8) -> Self {
        Self::new(
            "group-id",
            opcode,
            Generator::Slot {
                template: PayloadTemplate::new([0, BASE_PARAMETER, BASE_VALUE], 0),
                values: 0..=0xFF,
            },
        )
    }

    /// The four canonical modules, in order.
    pub fn standard_suite(opcode: u8) -> Vec<Self> {
        vec![
            Self::payload_length(opcode),
            Self::parameter_value(opcode),
            Self::parameter_name(opcode),
            Self::group_id(opcode),
        ]
    }

    /// All 65536 two-byte payloads.
    pub fn two_byte(opcode: u8) -> Self {
        Self::new("two-byte", opcode, Generator::Exhaustive { width: 2 })
            .with_settle(Duration::from_millis(50))
    }

    /// Seeded random payloads of the standard lengths.
    pub fn random(opcode: u8, seed: u64) -> Self {
        Self::new(
            "random",
            opcode,
            Generator::Random {
                lengths: RANDOM_LENGTHS.to_vec(),
                trials: RANDOM_TRIALS,
                seed,
            },
        )
        .with_settle(Duration::from_millis(120))
    }

    /// Every opcode with an empty payload.
    pub fn opcode_sweep(opcodes: RangeInclusive<u8>) -> Self {
        let first = *opcodes.start();
        Self::new("opcode-sweep", first, Generator::OpcodeSweep { opcodes })
            .with_settle(Duration::from_millis(120))
    }

    /// A `total`-byte cyclic pattern sent in chunks that fit one frame each.
    pub fn overflow(opcode: u8, total: usize) -> Self {
        let payloads = cyclic_pattern(total)
            .chunks(OVERFLOW_CHUNK)
            .map(<[u8]>::to_vec)
            .collect();
        Self::new("overflow", opcode, Generator::Fixed { payloads })
            .with_settle(Duration::from_millis(50))
    }

    /// Number of candidates this module yields.
    pub fn len(&self) -> usize {
        match &self.generator {
            Generator::Length { pad, .. } => pad.len(),
            Generator::Slot { values, .. } => values
                .clone()
                .count(),
            Generator::Random {
                lengths, trials, ..
            } => lengths.len() * trials,
            Generator::Exhaustive { width } => exhaustive_count(*width),
            Generator::OpcodeSweep { opcodes } => opcodes
                .clone()
                .count(),
            Generator::Fixed { payloads } => payloads.len(),
        }
    }

    /// Whether the module yields nothing.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Candidates in enumeration order.
    pub fn candidates(&self) -> Box<dyn Iterator<Item = Candidate> + '_> {
        let opcode = self.opcode;
        let with_op = move |payload: Vec<u8>| Candidate { opcode, payload };

        match &self.generator {
            Generator::Length { base, pad } => Box::new(
                pad.clone()
                    .map(move |n| {
                        let mut payload = base.clone();
                        payload.resize(base.len() + n, 0);
                        payload
                    })
                    .map(with_op),
            ),
            Generator::Slot { template, values } => Box::new(
                values
                    .clone()
                    .map(move |v| template.fill(v))
                    .map(with_op),
            ),
            Generator::Random {
                lengths,
                trials,
                seed,
            } => {
                let mut rng = StdRng::seed_from_u64(*seed);
                let mut payloads = Vec::with_capacity(lengths.len() * trials);
                for &len in lengths {
                    for _ in 0..*trials {
                        let mut payload = vec![0u8; len];
                        rng.fill(&mut payload[..]);
                        payloads.push(payload);
                    }
                }
                Box::new(
                    payloads
                        .into_iter()
                        .map(with_op),
                )
            },
            Generator::Exhaustive { width } => {
                let wide = *width >= 2;
                let count = u32::try_from(exhaustive_count(*width)).unwrap_or(u32::MAX);
                Box::new(
                    (0..count)
                        .map(move |v| {
                            let bytes = v.to_be_bytes();
                            if wide {
                                bytes[2..].to_vec()
                            } else {
                                bytes[3..].to_vec()
                            }
                        })
                        .map(with_op),
                )
            },
            Generator::OpcodeSweep { opcodes } => Box::new(
                opcodes
                    .clone()
                    .map(|op| Candidate {
                        opcode: op,
                        payload: Vec::new(),
                    }),
            ),
            Generator::Fixed { payloads } => Box::new(
                payloads
                    .iter()
                    .cloned()
                    .map(with_op),
            ),
        }
    }
}

fn exhaustive_count(width: u8) -> usize {
    if width >= 2 { 0x1_0000 } else { 0x100 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payloads(module: &FuzzModule) -> Vec<Vec<u8>> {
        module
            .candidates()
            .map(|c| c.payload)
            .collect()
    }

    #[test]
    fn test_template_fill() {
        let template = PayloadTemplate::new([1, 2, 3], 1);
        assert_eq!(template.fill(0xAA), vec![1, 0xAA, 3]);
        let padded = PayloadTemplate::new(Vec::new(), 2);
        assert_eq!(padded.fill(7), vec![0, 0, 7]);
    }

    #[test]
    fn test_payload_length_module() {
        let module = FuzzModule::payload_length(0x0D);
        let all = payloads(&module);
        assert_eq!(all.len(), 15);
        assert_eq!(module.len(), 15);
        assert_eq!(all[0], vec![0x00, 0x41]);
        assert_eq!(all[14].len(), 16);
    }

    #[test]
    fn test_parameter_value_module() {
        let all = payloads(&FuzzModule::parameter_value(0x0D));
        assert_eq!(all.len(), 256);
        assert_eq!(all[0], vec![0x00, 0x41, 0x00]);
        assert_eq!(all[255], vec![0x00, 0x41, 0xFF]);
    }

    #[test]
    fn test_parameter_name_module_is_printable() {
        let all = payloads(&FuzzModule::parameter_name(0x0D));
        assert_eq!(all.len(), 0x7F - 0x20);
        assert_eq!(all[0], vec![0x00, b' ', 0x01]);
        assert_eq!(all.last().unwrap(), &vec![0x00, b'~', 0x01]);
    }

    #[test]
    fn test_group_module() {
        let all = payloads(&FuzzModule::group_id(0x0D));
        assert_eq!(all[0x42], vec![0x42, 0x41, 0x01]);
    }

    #[test]
    fn test_standard_suite_order() {
        let names: Vec<_> = FuzzModule::standard_suite(0x0D)
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(
            names,
            ["payload-length", "parameter-value", "parameter-name", "group-id"]
        );
    }

    #[test]
    fn test_random_is_seeded() {
        let a = payloads(&FuzzModule::random(0x10, 7));
        let b = payloads(&FuzzModule::random(0x10, 7));
        let c = payloads(&FuzzModule::random(0x10, 8));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), RANDOM_LENGTHS.len() * RANDOM_TRIALS);
        assert_eq!(a.last().unwrap().len(), 128);
    }

    #[test]
    fn test_exhaustive_two_byte() {
        let module = FuzzModule::two_byte(0x0D);
        assert_eq!(module.len(), 65536);
        let mut it = module.candidates();
        assert_eq!(it.next().unwrap().payload, vec![0x00, 0x00]);
        assert_eq!(it.nth(0x0100 - 1).unwrap().payload, vec![0x01, 0x00]);
        assert_eq!(module.candidates().last().unwrap().payload, vec![0xFF, 0xFF]);
    }

    #[test]
    fn test_opcode_sweep_varies_opcode() {
        let module = FuzzModule::opcode_sweep(0x70..=0x72);
        let ops: Vec<_> = module
            .candidates()
            .map(|c| (c.opcode, c.payload.len()))
            .collect();
        assert_eq!(ops, vec![(0x70, 0), (0x71, 0), (0x72, 0)]);
    }

    #[test]
    fn test_overflow_chunks() {
        let module = FuzzModule::overflow(0x0D, 4096);
        let all = payloads(&module);
        assert_eq!(all.len(), 4096usize.div_ceil(OVERFLOW_CHUNK));
        assert!(
            all.iter()
                .all(|p| p.len() <= OVERFLOW_CHUNK)
        );
        assert_eq!(all.concat(), cyclic_pattern(4096));
    }
}
