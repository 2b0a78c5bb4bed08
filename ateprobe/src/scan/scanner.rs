//! Register scanning over the text console.

use {
    crate::{
        channel::Channel,
        error::{Error, Result},
        is_interrupted_requested,
        port::Port,
        protocol::classify::contains,
        scan::{
            command::{RegisterCommand, ReplyParser, parse_value},
            map::{RegisterMap, RegisterValue},
        },
    },
    log::{debug, info, warn},
    std::{ops::RangeInclusive, thread, time::Duration},
};

/// Text printed by the bootloader when the device restarts.
pub const REBOOT_SIGNATURE: &str = "htol.bin";

/// Data lengths tried by [`RegisterScanner::write_overflow`].
pub const OVERFLOW_LENGTHS: [usize; 21] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 32, 64, 128, 256, 260,
];

/// Scanner timing.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Window in which the command echo is read and discarded.
    pub echo_timeout: Duration,
    /// Pause between the echo and the reply read.
    pub settle: Duration,
    /// How long to wait for a matching reply.
    pub reply_timeout: Duration,
    /// Pause after a write before its reply is read.
    pub write_settle: Duration,
    /// Report progress every this many addresses.
    pub progress_every: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            echo_timeout: Duration::from_millis(100),
            settle: Duration::from_millis(100),
            reply_timeout: Duration::from_secs(1),
            write_settle: Duration::from_millis(200),
            progress_every: 32,
        }
    }
}

/// Result of a soft-reset probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResetProbe {
    /// Value read before the tweak.
    pub original: u8,
    /// Value written (bit 0 flipped).
    pub written: u8,
    /// Whether the reboot signature appeared.
    pub rebooted: bool,
}

/// Reads and writes registers through the console sub-protocol.
#[derive(Debug, Clone)]
pub struct RegisterScanner {
    config: ScanConfig,
    parser: ReplyParser,
}

impl RegisterScanner {
    /// Scanner with the stock reply pattern.
    pub fn new(config: ScanConfig) -> Result<Self> {
        Ok(Self {
            config,
            parser: ReplyParser::new()?,
        })
    }

    /// Use a custom reply parser.
    #[must_use]
    pub fn with_parser(mut self, parser: ReplyParser) -> Self {
        self.parser = parser;
        self
    }

    /// Read every address in `range`, ascending, exactly once.
    ///
    /// `progress(done, total)` fires every `progress_every` addresses and
    /// after the last one.
    pub fn scan<P: Port>(
        &self,
        channel: &mut Channel<P>,
        range: RangeInclusive<u8>,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<RegisterMap> {
        let total = range
            .clone()
            .count();
        let every = self
            .config
            .progress_every
            .max(1);
        info!(
            "Scanning 0x{:02x}..=0x{:02x} ({total} registers)",
            range.start(),
            range.end()
        );

        let mut map = RegisterMap::new();
        for (done, addr) in range
            .enumerate()
            .map(|(i, a)| (i + 1, a))
        {
            if is_interrupted_requested() {
                return Err(Error::Interrupted);
            }

            let value = RegisterValue::from(self.read_register(channel, addr)?);
            debug!("[SCAN] 0x{addr:02x}: {value}");
            map.insert(addr, value);

            if done % every == 0 || done == total {
                info!("Scan progress: {done}/{total}");
                progress(done, total);
            }
        }

        info!(
            "Scan finished: {} of {total} registers answered",
            map.readable()
                .count()
        );
        Ok(map)
    }

    /// Read one register. `None` if no matching reply arrived.
    pub fn read_register<P: Port>(&self, channel: &mut Channel<P>, addr: u8) -> Result<Option<String>> {
        channel.write(&RegisterCommand::Read(addr).encode())?;

        // The echo chunk may already hold part or all of the reply
        let echo = channel.read_chunk(self.config.echo_timeout)?;
        if let Some(value) = self
            .parser
            .parse(&String::from_utf8_lossy(&echo), addr)
        {
            return Ok(Some(value));
        }

        if !self
            .config
            .settle
            .is_zero()
        {
            thread::sleep(self.config.settle);
        }

        let parser = &self.parser;
        let outcome = channel.extend_until(echo, self.config.reply_timeout, |data| {
            parser
                .parse(&String::from_utf8_lossy(data), addr)
                .is_some()
        })?;

        if outcome.matched {
            Ok(self
                .parser
                .parse(&String::from_utf8_lossy(&outcome.data), addr))
        } else {
            debug!(
                "No reply pattern for 0x{addr:02x} in {:?}",
                String::from_utf8_lossy(&outcome.data)
            );
            Ok(None)
        }
    }

    /// Write one register.
    ///
    /// A reply is not required; whatever arrives is logged and returned.
    pub fn write_register<P: Port>(
        &self,
        channel: &mut Channel<P>,
        addr: u8,
        value: u8,
    ) -> Result<Vec<u8>> {
        info!("Writing 0x{value:02x} to register 0x{addr:02x}");
        channel.write(&RegisterCommand::Write(addr, value).encode())?;
        if !self
            .config
            .write_settle
            .is_zero()
        {
            thread::sleep(self.config.write_settle);
        }

        let reply = channel.read_window(self.config.echo_timeout)?;
        if reply.is_empty() {
            debug!("No reply to write (normal for this console)");
        } else {
            info!(
                "Write reply: {}",
                String::from_utf8_lossy(&reply).trim()
            );
        }
        Ok(reply)
    }

    /// Send oversized writes to `addr`, one per entry of `lengths`.
    ///
    /// Stops at the first length the console leaves unanswered (not even
    /// an echo) and returns it. `None` means every write was answered.
    pub fn write_overflow<P: Port>(
        &self,
        channel: &mut Channel<P>,
        addr: u8,
        lengths: &[usize],
    ) -> Result<Option<usize>> {
        info!(
            "Overflow test on register 0x{addr:02x} ({} lengths)",
            lengths.len()
        );
        for &length in lengths {
            if is_interrupted_requested() {
                return Err(Error::Interrupted);
            }

            channel.write(&RegisterCommand::Overflow(addr, length).encode())?;
            if !self
                .config
                .write_settle
                .is_zero()
            {
                thread::sleep(self.config.write_settle);
            }

            let reply = channel.read_window(self.config.echo_timeout)?;
            if reply.is_empty() {
                warn!("!!! No response to a {length}-byte write to 0x{addr:02x}, possible crash");
                return Ok(Some(length));
            }
            debug!(
                "[OVERFLOW] len {length}: {}",
                String::from_utf8_lossy(&reply).trim()
            );
        }
        info!("Console answered every overflow length");
        Ok(None)
    }

    /// Write one register, wait `pause`, then scan `range`.
    pub fn tweak_and_scan<P: Port>(
        &self,
        channel: &mut Channel<P>,
        addr: u8,
        value: u8,
        pause: Duration,
        range: RangeInclusive<u8>,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<RegisterMap> {
        self.write_register(channel, addr, value)?;
        info!("Waiting {}ms for the change to take effect", pause.as_millis());
        channel.drain(pause)?;
        self.scan(channel, range, progress)
    }

    /// Flip bit 0 of a register and listen for a reboot.
    ///
    /// Returns `None` if the register cannot be read.
    pub fn probe_soft_reset<P: Port>(
        &self,
        channel: &mut Channel<P>,
        addr: u8,
        signature: &str,
        listen: Duration,
    ) -> Result<Option<ResetProbe>> {
        let Some(original) = self
            .read_register(channel, addr)?
            .as_deref()
            .and_then(parse_value)
            .and_then(|v| u8::try_from(v).ok())
        else {
            warn!("Register 0x{addr:02x} is unreadable; not tweaking it");
            return Ok(None);
        };

        let written = original ^ 0x01;
        info!("Register 0x{addr:02x} = 0x{original:02x}, writing 0x{written:02x}");
        let reply = self.write_register(channel, addr, written)?;

        let rebooted = contains(&reply, signature.as_bytes()) || {
            info!("Listening {}s for {signature:?}", listen.as_secs());
            channel
                .read_until(listen, |data| contains(data, signature.as_bytes()))?
                .matched
        };
        if rebooted {
            warn!("!!! Soft reset: writing 0x{written:02x} to 0x{addr:02x} reboots the device");
        } else {
            info!("No reboot detected");
        }

        Ok(Some(ResetProbe {
            original,
            written,
            rebooted,
        }))
    }
}
