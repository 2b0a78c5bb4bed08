//! Bootloader escape protocol.
//!
//! ```text
//! enter   : 1B 1B
//! memdump : 1B 52 addr(u32 LE) len(u16 LE) [xor]
//! recover : 1B 00
//! ```
//!
//! The optional trailer is the XOR of every preceding byte. Whether the
//! loader wants it is unknown, so the sweep alternates both forms.

use {
    crate::{
        channel::Channel,
        error::{Error, Result},
        is_interrupted_requested,
        port::Port,
        protocol::{checksum::crc8_xor, frame::hex_string},
    },
    byteorder::{ByteOrder, LittleEndian},
    log::{debug, info, warn},
    std::{thread, time::Duration},
};

/// Escape byte that starts every loader command.
pub const ESCAPE: u8 = 0x1B;

/// Memory read command byte.
pub const READ_MEMORY: u8 = b'R';

/// Sent to a loader that stopped answering.
pub const RECOVERY_FRAME: [u8; 2] = [ESCAPE, 0x00];

/// Memory read frame for `len` bytes at `addr`.
pub fn memdump_frame(addr: u32, len: u16, with_crc: bool) -> Vec<u8> {
    let mut frame = vec![0u8; 8];
    frame[0] = ESCAPE;
    frame[1] = READ_MEMORY;
    LittleEndian::write_u32(&mut frame[2..6], addr);
    LittleEndian::write_u16(&mut frame[6..8], len);
    if with_crc {
        let xor = crc8_xor(&frame);
        frame.push(xor);
    }
    frame
}

/// Unjam sequence sent after a run of unanswered frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recovery {
    /// Bytes written to the target.
    pub frame: Vec<u8>,
    /// Consecutive silent frames that trigger it; 0 disables.
    pub after: usize,
    /// Time spent draining after the frame.
    pub pause: Duration,
}

impl Default for Recovery {
    fn default() -> Self {
        Self::escape_nul()
    }
}

impl Recovery {
    /// `1B 00` after three silent frames, then half a second of quiet.
    pub fn escape_nul() -> Self {
        Self {
            frame: RECOVERY_FRAME.to_vec(),
            after: 3,
            pause: Duration::from_millis(500),
        }
    }

    /// Whether `silent` consecutive quiet frames call for a recovery.
    pub fn due(&self, silent: usize) -> bool {
        self.after > 0 && silent >= self.after
    }

    /// Send the recovery frame and discard whatever follows it.
    pub fn apply<P: Port>(&self, channel: &mut Channel<P>) -> Result<usize> {
        warn!(
            "No answer to {} frames in a row, sending recovery {}",
            self.after,
            hex_string(&self.frame)
        );
        channel.write(&self.frame)?;
        channel.drain(self.pause)
    }
}

/// Memory read sweep settings.
#[derive(Debug, Clone)]
pub struct MemDumpConfig {
    /// Start address.
    pub addr: u32,
    /// Bytes requested per frame.
    pub len: u16,
    /// Frames to send. Odd rounds carry the XOR trailer.
    pub rounds: usize,
    /// Pause between write and read.
    pub settle: Duration,
    /// Response read window.
    pub window: Duration,
    /// Gap before every frame but the first.
    pub inter_frame_delay: Duration,
    /// Recovery policy; `None` never unjams.
    pub recovery: Option<Recovery>,
}

impl Default for MemDumpConfig {
    fn default() -> Self {
        Self {
            addr: 0,
            len: 0x20,
            rounds: 256,
            settle: Duration::from_millis(150),
            window: Duration::from_millis(300),
            inter_frame_delay: Duration::from_millis(50),
            recovery: Some(Recovery::escape_nul()),
        }
    }
}

/// A memory read frame the loader answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemDumpReply {
    /// Round index.
    pub round: usize,
    /// Whether the frame carried the XOR trailer.
    pub with_crc: bool,
    /// Frame sent.
    pub frame: Vec<u8>,
    /// Bytes received.
    pub response: Vec<u8>,
}

/// Outcome of [`sweep_memdump`].
#[derive(Debug, Clone, Default)]
pub struct MemDumpReport {
    /// Frames sent, recovery frames excluded.
    pub sent: usize,
    /// Answered frames, in order.
    pub replies: Vec<MemDumpReply>,
    /// Recovery frames sent.
    pub recoveries: usize,
}

impl MemDumpReport {
    /// Whether any answered frame had the given trailer form.
    pub fn answered(&self, with_crc: bool) -> bool {
        self.replies
            .iter()
            .any(|r| r.with_crc == with_crc)
    }
}

/// Send memory read frames, alternating the trailer form each round.
pub fn sweep_memdump<P: Port>(
    channel: &mut Channel<P>,
    config: &MemDumpConfig,
    on_reply: &mut dyn FnMut(&MemDumpReply),
) -> Result<MemDumpReport> {
    info!(
        "Memory read sweep: {} rounds, 0x{:08X} + 0x{:X}",
        config.rounds, config.addr, config.len
    );

    let mut report = MemDumpReport::default();
    let mut silent = 0usize;
    for round in 0..config.rounds {
        if is_interrupted_requested() {
            return Err(Error::Interrupted);
        }
        if round > 0 && !config.inter_frame_delay.is_zero() {
            thread::sleep(config.inter_frame_delay);
        }

        let with_crc = round % 2 == 1;
        let frame = memdump_frame(config.addr, config.len, with_crc);
        channel.write(&frame)?;
        report.sent += 1;
        if !config.settle.is_zero() {
            thread::sleep(config.settle);
        }
        let response = channel.read_window(config.window)?;

        if response.is_empty() {
            silent += 1;
            debug!("[MEMDUMP #{round}] {} -> silence", hex_string(&frame));
            if let Some(recovery) = config
                .recovery
                .as_ref()
                .filter(|r| r.due(silent))
            {
                recovery.apply(channel)?;
                report.recoveries += 1;
                silent = 0;
            }
            continue;
        }

        silent = 0;
        info!(
            "[MEMDUMP #{round}] {} -> {}",
            hex_string(&frame),
            hex_string(&response)
        );
        let reply = MemDumpReply {
            round,
            with_crc,
            frame,
            response,
        };
        on_reply(&reply);
        report
            .replies
            .push(reply);
    }

    info!(
        "Memory read sweep done: {} of {} answered, {} recoveries",
        report.replies.len(),
        report.sent,
        report.recoveries
    );
    Ok(report)
}
