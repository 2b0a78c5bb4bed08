//! Bad-character search.
//!
//! A fixed filler payload establishes a baseline response. Each byte value
//! is then substituted at one position; any value whose response differs
//! from the baseline is one the parser treats specially.

use {
    crate::{
        channel::Channel,
        error::{Error, Result},
        fuzz::orchestrator::exchange,
        is_interrupted_requested,
        port::Port,
        protocol::{Frame, PLAIN, frame::CHECKSUMMED_OPCODE},
    },
    log::{debug, info, warn},
    std::{ops::RangeInclusive, thread, time::Duration},
};

/// Opcode of the frame sent ahead of every probe.
pub const TRIGGER_OPCODE: u8 = 0x72;

/// Bad-character search parameters.
#[derive(Debug, Clone)]
pub struct BadCharConfig {
    /// Opcode of the probe frame.
    pub opcode: u8,
    /// Payload length.
    pub length: usize,
    /// Index of the substituted byte.
    pub position: usize,
    /// Filler byte.
    pub filler: u8,
    /// Frame sent (and its reply drained) before every probe.
    pub trigger: Option<Frame>,
    /// Values substituted, ascending.
    pub values: RangeInclusive<u8>,
    /// Delay after the trigger frame.
    pub trigger_settle: Duration,
    /// Delay after the probe frame.
    pub settle: Duration,
    /// Response read window.
    pub window: Duration,
    /// Minimum gap between consecutive frames, triggers included.
    pub inter_frame_delay: Duration,
}

impl Default for BadCharConfig {
    fn default() -> Self {
        Self {
            opcode: CHECKSUMMED_OPCODE,
            length: 32,
            position: 16,
            filler: b'A',
            trigger: Frame::encode(TRIGGER_OPCODE, &[]).ok(),
            values: 0..=0xFF,
            trigger_settle: Duration::from_millis(100),
            settle: Duration::from_millis(200),
            window: Duration::from_millis(500),
            inter_frame_delay: Duration::from_millis(50),
        }
    }
}

impl BadCharConfig {
    /// Probe payload with `value` at the test position.
    pub fn payload(&self, value: u8) -> Vec<u8> {
        let mut payload = vec![self.filler; self.length];
        if let Some(slot) = payload.get_mut(self.position) {
            *slot = value;
        }
        payload
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

/// A byte whose substitution changed the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadChar {
    /// Substituted value.
    pub value: u8,
    /// Response it produced.
    pub response: Vec<u8>,
}

/// Result of a search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadCharReport {
    /// Response to the unmodified filler payload.
    pub baseline: Vec<u8>,
    /// Values whose response differed, ascending.
    pub bad: Vec<BadChar>,
}

fn probe<P: Port>(channel: &mut Channel<P>, config: &BadCharConfig, payload: &[u8]) -> Result<Vec<u8>> {
    if let Some(trigger) = &config.trigger {
        exchange(channel, trigger, config.trigger_settle, config.window)?;
        config.pause();
    }
    // Probes always use the plain layout, whatever the opcode's family
    let frame = Frame::encode_with(&PLAIN, config.opcode, payload)?;
    exchange(channel, &frame, config.settle, config.window)
}

/// Run a search, reporting each bad character as it is found.
pub fn find_bad_chars<P: Port>(
    channel: &mut Channel<P>,
    config: &BadCharConfig,
    on_bad: &mut dyn FnMut(&BadChar),
) -> Result<BadCharReport> {
    if config.position >= config.length {
        return Err(Error::Config(format!(
            "position {} is outside a {}-byte payload",
            config.position, config.length
        )));
    }

    let baseline = probe(channel, config, &vec![config.filler; config.length])?;
    if baseline.is_empty() {
        return Err(Error::NoBaseline);
    }
    info!("Baseline response: {:?}", String::from_utf8_lossy(&baseline));

    let mut bad = Vec::new();
    for value in config
        .values
        .clone()
    {
        if is_interrupted_requested() {
            return Err(Error::Interrupted);
        }
        config.pause();
        let response = probe(channel, config, &config.payload(value))?;
        debug!("0x{value:02x} -> {:?}", String::from_utf8_lossy(&response));
        if response != baseline {
            warn!(
                "Bad character 0x{value:02x}: {:?}",
                String::from_utf8_lossy(&response)
            );
            let found = BadChar { value, response };
            on_bad(&found);
            bad.push(found);
        }
    }

    info!("{} bad characters found", bad.len());
    Ok(BadCharReport { baseline, bad })
}
