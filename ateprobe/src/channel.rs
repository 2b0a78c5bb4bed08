//! Deadline-bounded duplex channel over a [`Port`].
//!
//! The device side is half-duplex, echoes what it receives and answers late
//! or not at all. Every read here is bounded by a deadline, and an expired
//! deadline yields empty data rather than an error: silence is an answer.
//!
//! The channel also keeps an [`ActivityClock`] that a supervisor can watch
//! from another thread without touching the data stream.

use {
    crate::{
        error::{Error, Result},
        port::{ControlLine, Port},
        protocol::hex_string,
    },
    log::trace,
    std::{
        io::ErrorKind,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        thread,
        time::{Duration, Instant},
    },
};

/// Size of a single driver read.
const READ_CHUNK: usize = 256;

/// Quiet period that ends a response window early once data has arrived.
pub const DEFAULT_QUIET_GAP: Duration = Duration::from_millis(100);

/// Shared timestamp of the last I/O on a channel.
///
/// Cloning is cheap; every clone observes the same clock.
#[derive(Debug, Clone)]
pub struct ActivityClock {
    origin: Instant,
    last_micros: Arc<AtomicU64>,
}

impl Default for ActivityClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityClock {
    /// Create a clock that counts as active now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_micros: Arc::new(AtomicU64::new(0)),
        }
    }

    fn now_micros(&self) -> u64 {
        u64::try_from(
            self.origin
                .elapsed()
                .as_micros(),
        )
        .unwrap_or(u64::MAX)
    }

    /// Record activity now.
    pub fn touch(&self) {
        self.last_micros
            .store(self.now_micros(), Ordering::Relaxed);
    }

    /// Time since the last recorded activity.
    pub fn idle(&self) -> Duration {
        let last = self
            .last_micros
            .load(Ordering::Relaxed);
        Duration::from_micros(
            self.now_micros()
                .saturating_sub(last),
        )
    }
}

/// Bytes collected by [`Channel::read_until`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOutcome {
    /// Everything read, matched or not.
    pub data: Vec<u8>,
    /// Whether the predicate matched before the deadline.
    pub matched: bool,
}

/// Exclusive, deadline-bounded session over a port.
///
/// Every operation takes `&mut self`, so one session can never have two
/// concurrent readers.
pub struct Channel<P: Port> {
    port: P,
    clock: ActivityClock,
    quiet_gap: Duration,
}

impl<P: Port> Channel<P> {
    /// Wrap an opened port.
    pub fn new(port: P) -> Self {
        Self {
            port,
            clock: ActivityClock::new(),
            quiet_gap: DEFAULT_QUIET_GAP,
        }
    }

    /// Set the quiet gap that ends [`Channel::read_window`] early.
    #[must_use]
    pub fn with_quiet_gap(mut self, gap: Duration) -> Self {
        self.quiet_gap = gap;
        self
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the channel and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// A handle onto this channel's activity clock.
    pub fn clock(&self) -> ActivityClock {
        self.clock
            .clone()
    }

    /// A control-only handle onto the same device.
    pub fn control_line(&self) -> Result<Box<dyn ControlLine>> {
        self.port
            .control_line()
    }

    /// Write all bytes and flush.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        trace!("TX [{}] {}", bytes.len(), hex_string(bytes));
        match self
            .port
            .write_all_bytes(bytes)
        {
            Ok(()) => {},
            Err(Error::Io(e)) if e.kind() == ErrorKind::TimedOut => {
                return Err(Error::Timeout(format!(
                    "write of {} bytes did not complete",
                    bytes.len()
                )));
            },
            Err(e) => return Err(e),
        }
        self.clock
            .touch();
        Ok(())
    }

    /// Read whatever arrives first, waiting at most `timeout`.
    ///
    /// Returns an empty vector if the line stayed quiet.
    pub fn read_chunk(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; READ_CHUNK];

        loop {
            match self
                .port
                .read(&mut buf)
            {
                Ok(n) if n > 0 => {
                    trace!("RX [{n}] {}", hex_string(&buf[..n]));
                    self.clock
                        .touch();
                    return Ok(buf[..n].to_vec());
                },
                Ok(_) => thread::sleep(Duration::from_millis(1)),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) => {},
                Err(e) => return Err(Error::Io(e)),
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
        }
    }

    /// Collect a response for up to `window`.
    ///
    /// Once the first bytes arrive, a quiet gap ends the window early.
    pub fn read_window(&mut self, window: Duration) -> Result<Vec<u8>> {
        let deadline = Instant::now() + window;
        let mut data = Vec::new();

        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let mut wait = deadline - now;
            if !data.is_empty() {
                wait = wait.min(self.quiet_gap);
            }

            let chunk = self.read_chunk(wait)?;
            if chunk.is_empty() {
                if !data.is_empty() {
                    break;
                }
            } else {
                data.extend_from_slice(&chunk);
            }
        }

        Ok(data)
    }

    /// Accumulate reads until `matches` accepts the buffer or `timeout` ends.
    pub fn read_until<F>(&mut self, timeout: Duration, matches: F) -> Result<ReadOutcome>
    where
        F: FnMut(&[u8]) -> bool,
    {
        self.extend_until(Vec::new(), timeout, matches)
    }

    /// Like [`Channel::read_until`], but starting from bytes already read.
    ///
    /// The seed is tested before any further read, so a reply that arrived
    /// together with an earlier chunk is not lost.
    pub fn extend_until<F>(
        &mut self,
        initial: Vec<u8>,
        timeout: Duration,
        mut matches: F,
    ) -> Result<ReadOutcome>
    where
        F: FnMut(&[u8]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut outcome = ReadOutcome {
            matched: false,
            data: initial,
        };
        if !outcome.data.is_empty() && matches(&outcome.data) {
            outcome.matched = true;
            return Ok(outcome);
        }

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Ok(outcome);
            }

            let chunk = self.read_chunk(deadline - now)?;
            if !chunk.is_empty() {
                outcome
                    .data
                    .extend_from_slice(&chunk);
                if matches(&outcome.data) {
                    outcome.matched = true;
                    return Ok(outcome);
                }
            }
        }
    }

    /// Read and discard everything that arrives within `window`.
    pub fn drain(&mut self, window: Duration) -> Result<usize> {
        let deadline = Instant::now() + window;
        let mut discarded = 0;
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            discarded += self
                .read_chunk(deadline - now)?
                .len();
        }
        if discarded > 0 {
            trace!("Drained {discarded} bytes");
        }
        Ok(discarded)
    }
}
