//! Checksum discovery for the checksummed frame family.
//!
//! For each payload length the named algorithms are tried first, each over
//! every byte range it might cover. When none is accepted, the whole 16-bit
//! trailer space can be brute-forced with a shorter settle delay. A length
//! where even that fails is recorded as rejected and the sweep moves on.

use {
    crate::{
        channel::Channel,
        error::{Error, Result},
        fuzz::orchestrator::exchange,
        is_interrupted_requested,
        port::Port,
        protocol::{
            ChecksumAlgorithm, Classification, Classifier, Frame,
            frame::{CHECKSUMMED, CHECKSUMMED_OPCODE},
        },
    },
    log::{debug, info, warn},
    std::{fmt, ops::RangeInclusive, thread, time::Duration},
};

/// Payload source, repeated as needed to reach each length.
pub const DISCOVERY_PATTERN: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// Discovery payload of `length` bytes.
pub fn discovery_payload(length: usize) -> Vec<u8> {
    DISCOVERY_PATTERN
        .iter()
        .copied()
        .cycle()
        .take(length)
        .collect()
}

/// Bytes a checksum is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coverage {
    /// Opcode, length field and payload.
    Body,
    /// Payload only.
    Payload,
    /// Preamble followed by the body.
    WithPreamble,
}

impl Coverage {
    /// Every coverage, in the order discovery tries them.
    pub const ALL: [Self; 3] = [Self::Body, Self::Payload, Self::WithPreamble];

    /// Bytes covered for a checksummed frame.
    pub fn region(self, opcode: u8, payload: &[u8]) -> Vec<u8> {
        match self {
            Self::Body => Frame::checksum_region(opcode, payload),
            Self::Payload => payload.to_vec(),
            Self::WithPreamble => {
                let mut region = CHECKSUMMED
                    .preamble
                    .to_vec();
                region.extend(Frame::checksum_region(opcode, payload));
                region
            },
        }
    }
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Body => "body",
            Self::Payload => "payload",
            Self::WithPreamble => "preamble+body",
        })
    }
}

/// One named algorithm tried over one coverage at one length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmTrial {
    /// Algorithm tried.
    pub algorithm: ChecksumAlgorithm,
    /// Bytes it was computed over.
    pub coverage: Coverage,
    /// Trailer value sent.
    pub checksum: u16,
    /// Classified response.
    pub classification: Classification,
}

/// Outcome of the brute-force stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BruteForce {
    /// Not run: a named algorithm matched, or brute force is disabled.
    Skipped,
    /// This trailer value was accepted.
    Found(u16),
    /// No value in the searched range was accepted.
    Rejected,
}

/// Per-length result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumFinding {
    /// Payload length.
    pub length: usize,
    /// Named-algorithm trials, in order.
    pub trials: Vec<AlgorithmTrial>,
    /// Brute-force outcome.
    pub brute_force: BruteForce,
}

impl ChecksumFinding {
    /// Named algorithms the device accepted at this length, over any
    /// coverage, without repeats.
    pub fn accepted(&self) -> Vec<ChecksumAlgorithm> {
        let mut algorithms = Vec::new();
        for trial in self.accepted_trials() {
            if !algorithms.contains(&trial.algorithm) {
                algorithms.push(trial.algorithm);
            }
        }
        algorithms
    }

    /// Trials the device accepted, in order.
    pub fn accepted_trials(&self) -> impl Iterator<Item = &AlgorithmTrial> {
        self.trials
            .iter()
            .filter(|t| t.classification == Classification::Accepted)
    }

    /// Whether every attempt at this length was rejected.
    pub fn is_rejected(&self) -> bool {
        self.brute_force == BruteForce::Rejected
    }
}

/// Checksum discovery driver.
#[derive(Debug, Clone)]
pub struct ChecksumDiscovery {
    opcode: u8,
    max_len: usize,
    coverages: Vec<Coverage>,
    brute_force: bool,
    brute_range: RangeInclusive<u16>,
    settle: Duration,
    brute_settle: Duration,
    window: Duration,
    inter_frame_delay: Duration,
    classifier: Classifier,
}

impl Default for ChecksumDiscovery {
    fn default() -> Self {
        Self {
            opcode: CHECKSUMMED_OPCODE,
            max_len: 32,
            coverages: Coverage::ALL.to_vec(),
            brute_force: true,
            brute_range: 0..=u16::MAX,
            settle: Duration::from_millis(100),
            brute_settle: Duration::from_millis(20),
            window: Duration::from_millis(100),
            inter_frame_delay: Duration::from_millis(50),
            classifier: Classifier::default(),
        }
    }
}

impl ChecksumDiscovery {
    /// Discovery for `opcode` with default limits.
    pub fn new(opcode: u8) -> Self {
        Self {
            opcode,
            ..Self::default()
        }
    }

    /// Highest payload length to try.
    #[must_use]
    pub fn with_max_len(mut self, max_len: usize) -> Self {
        self.max_len = max_len;
        self
    }

    /// Byte ranges each named algorithm is tried over.
    #[must_use]
    pub fn with_coverages(mut self, coverages: &[Coverage]) -> Self {
        self.coverages = coverages.to_vec();
        self
    }

    /// Enable or disable the brute-force stage.
    #[must_use]
    pub fn with_brute_force(mut self, enabled: bool) -> Self {
        self.brute_force = enabled;
        self
    }

    /// Restrict the brute-force search.
    #[must_use]
    pub fn with_brute_range(mut self, range: RangeInclusive<u16>) -> Self {
        self.brute_range = range;
        self
    }

    /// Settle delays for named trials and brute force, and the read window.
    #[must_use]
    pub fn with_timing(mut self, settle: Duration, brute_settle: Duration, window: Duration) -> Self {
        self.settle = settle;
        self.brute_settle = brute_settle;
        self.window = window;
        self
    }

    /// Minimum gap between consecutive frames.
    #[must_use]
    pub fn with_inter_frame_delay(mut self, delay: Duration) -> Self {
        self.inter_frame_delay = delay;
        self
    }

    /// Run every length in `1..=max_len`.
    pub fn run<P: Port>(
        &self,
        channel: &mut Channel<P>,
        on_finding: &mut dyn FnMut(&ChecksumFinding),
    ) -> Result<Vec<ChecksumFinding>> {
        let mut findings = Vec::with_capacity(self.max_len);

        for length in 1..=self.max_len {
            if is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            if length > 1 {
                self.pause();
            }
            let finding = self.probe_length(channel, length)?;
            on_finding(&finding);
            findings.push(finding);
        }

        Ok(findings)
    }

    /// Try one payload length.
    pub fn probe_length<P: Port>(
        &self,
        channel: &mut Channel<P>,
        length: usize,
    ) -> Result<ChecksumFinding> {
        let payload = discovery_payload(length);
        let count = ChecksumAlgorithm::ALL.len() * self.coverages.len();
        info!("[LEN {length}] trying {count} algorithm and coverage pairs");

        let mut trials: Vec<AlgorithmTrial> = Vec::with_capacity(count);
        for &coverage in &self.coverages {
            let region = coverage.region(self.opcode, &payload);
            for algorithm in ChecksumAlgorithm::ALL {
                if !trials.is_empty() {
                    self.pause();
                }
                let checksum = algorithm.compute(&region);
                let frame = Frame::with_checksum(self.opcode, &payload, checksum)?;
                let response = exchange(channel, &frame, self.settle, self.window)?;
                let classification = self
                    .classifier
                    .classify(&response);
                debug!("  {algorithm:<12} {coverage:<13} 0x{checksum:04X} -> {classification}");
                if classification.is_accepted() {
                    warn!("!!! ACCEPTED !!! {algorithm} over {coverage} at length {length}: {frame}");
                }
                trials.push(AlgorithmTrial {
                    algorithm,
                    coverage,
                    checksum,
                    classification,
                });
            }
        }

        let any_accepted = trials
            .iter()
            .any(|t| t.classification.is_accepted());
        let brute_force = if any_accepted || !self.brute_force {
            BruteForce::Skipped
        } else {
            self.brute_force(channel, &payload)?
        };

        if brute_force == BruteForce::Rejected {
            info!("[LEN {length}] no checksum accepted");
        }

        Ok(ChecksumFinding {
            length,
            trials,
            brute_force,
        })
    }

    fn brute_force<P: Port>(&self, channel: &mut Channel<P>, payload: &[u8]) -> Result<BruteForce> {
        info!(
            "Brute-forcing 0x{:04X}..=0x{:04X}",
            self.brute_range.start(),
            self.brute_range.end()
        );

        for checksum in self
            .brute_range
            .clone()
        {
            if is_interrupted_requested() {
                return Err(Error::Interrupted);
            }
            self.pause();
            let frame = Frame::with_checksum(self.opcode, payload, checksum)?;
            let response = exchange(channel, &frame, self.brute_settle, self.window)?;
            if self
                .classifier
                .classify(&response)
                .is_accepted()
            {
                warn!("!!! ACCEPTED !!! brute-forced checksum 0x{checksum:04X}: {frame}");
                return Ok(BruteForce::Found(checksum));
            }
        }

        Ok(BruteForce::Rejected)
    }

    fn pause(&self) {
        if !self
            .inter_frame_delay
            .is_zero()
        {
            thread::sleep(self.inter_frame_delay);
        }
    }
}
