//! Boot synchronization.
//!
//! After power-on the firmware prints a banner ending in a key prompt and
//! waits briefly for a mode selection. The synchronizer watches for the
//! prompt, sends the key sequence for the requested mode and then waits for
//! that mode's ready banner. The bootloader prints no banner, so its mode
//! counts as ready as soon as the escape sequence is out.
//!
//! ```text
//! AwaitingPrompt --prompt seen--> ModeKeySent --ready marker--> Ready
//!       |                              |
//!       +--timeout: PromptNotFound     +--timeout--> Degraded
//! ```

use {
    crate::{
        channel::Channel,
        error::{Error, Result},
        port::Port,
        protocol::classify::contains,
    },
    log::{debug, info, warn},
    std::{fmt, str::FromStr, time::Duration},
};

/// Text the firmware prints while waiting for a mode key.
pub const PROMPT_MARKERS: &[&str] = &["Please key"];

/// Operating mode selected at the boot prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetMode {
    /// Factory test command mode.
    Ate,
    /// Debug console.
    Debug,
    /// Image sensor register console, day profile.
    CmosDay,
    /// Image sensor register console, night profile.
    CmosNight,
    /// Bootloader escape protocol.
    Loader,
}

impl TargetMode {
    /// Key sequence sent at the prompt.
    pub fn key(self) -> &'static [u8] {
        match self {
            Self::Ate => b"y",
            Self::Debug => b"d",
            Self::CmosDay => b"c",
            Self::CmosNight => b"n",
            Self::Loader => b"\x1B\x1B",
        }
    }

    /// Whether the key is followed by the line terminator.
    ///
    /// Escape sequences are raw bytes; a trailing CR would be read as the
    /// start of the next loader command.
    pub fn line_terminated(self) -> bool {
        !matches!(self, Self::Loader)
    }

    /// Banners that confirm the mode came up. Empty when the mode prints
    /// nothing.
    pub fn ready_markers(self) -> &'static [&'static str] {
        match self {
            Self::Ate => &["Start ATE", "Start ATE Test", "eATE_INIT"],
            Self::Debug => &["display Debug Info"],
            Self::CmosDay | Self::CmosNight => &["Example:"],
            Self::Loader => &[],
        }
    }
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ate => "ate",
            Self::Debug => "debug",
            Self::CmosDay => "day",
            Self::CmosNight => "night",
            Self::Loader => "loader",
        })
    }
}

impl FromStr for TargetMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s
            .to_ascii_lowercase()
            .as_str()
        {
            "ate" => Ok(Self::Ate),
            "debug" => Ok(Self::Debug),
            "day" | "cmos-day" => Ok(Self::CmosDay),
            "night" | "cmos-night" => Ok(Self::CmosNight),
            "loader" => Ok(Self::Loader),
            other => Err(Error::Config(format!("unknown target mode: {other}"))),
        }
    }
}

/// Progress of a boot handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the key prompt.
    AwaitingPrompt,
    /// Key sent, waiting for the ready banner.
    ModeKeySent,
    /// Ready banner seen.
    Ready,
    /// Ready banner never came; the session continues anyway.
    Degraded,
}

impl SessionState {
    /// Whether the handshake is over.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Degraded)
    }
}

/// Boot handshake timing.
#[derive(Debug, Clone)]
pub struct BootConfig {
    /// How long to wait for the key prompt after opening the port.
    pub prompt_timeout: Duration,
    /// How long to wait for the mode's ready banner.
    pub ready_timeout: Duration,
    /// Bytes sent after the mode key.
    pub line_terminator: Vec<u8>,
    /// Banner tail discarded after the handshake.
    pub post_sync_drain: Duration,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            prompt_timeout: Duration::from_secs(20),
            ready_timeout: Duration::from_secs(10),
            line_terminator: b"\r".to_vec(),
            post_sync_drain: Duration::from_millis(1100),
        }
    }
}

/// Drives a device from its boot prompt into a target mode.
#[derive(Debug)]
pub struct BootSynchronizer {
    config: BootConfig,
    state: SessionState,
}

impl BootSynchronizer {
    /// Create a synchronizer in the `AwaitingPrompt` state.
    pub fn new(config: BootConfig) -> Self {
        Self {
            config,
            state: SessionState::AwaitingPrompt,
        }
    }

    /// Current handshake state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the handshake.
    ///
    /// A missing prompt is fatal. A missing ready banner degrades the
    /// session but is not an error.
    pub fn synchronize<P: Port>(
        &mut self,
        channel: &mut Channel<P>,
        mode: TargetMode,
    ) -> Result<SessionState> {
        self.state = SessionState::AwaitingPrompt;
        info!(
            "Waiting up to {}s for boot prompt; power-cycle the device now",
            self.config
                .prompt_timeout
                .as_secs()
        );

        let prompt = channel.read_until(self.config.prompt_timeout, |buf| {
            PROMPT_MARKERS
                .iter()
                .any(|m| contains(buf, m.as_bytes()))
        })?;
        if !prompt.matched {
            debug!(
                "Boot output without prompt: {:?}",
                String::from_utf8_lossy(&prompt.data)
            );
            return Err(Error::PromptNotFound {
                waited: self.config.prompt_timeout,
            });
        }

        info!("Boot prompt seen, selecting {mode} mode");
        let mut key = mode
            .key()
            .to_vec();
        if mode.line_terminated() {
            key.extend_from_slice(&self.config.line_terminator);
        }
        channel.write(&key)?;
        self.state = SessionState::ModeKeySent;

        let markers = mode.ready_markers();
        let ready = markers.is_empty()
            || channel
                .read_until(self.config.ready_timeout, |buf| {
                    markers
                        .iter()
                        .any(|m| contains(buf, m.as_bytes()))
                })?
                .matched;

        self.state = if ready {
            info!("Target is in {mode} mode");
            SessionState::Ready
        } else {
            warn!(
                "No {mode} ready banner within {}s; continuing degraded",
                self.config
                    .ready_timeout
                    .as_secs()
            );
            SessionState::Degraded
        };

        if !self
            .config
            .post_sync_drain
            .is_zero()
        {
            channel.drain(self.config.post_sync_drain)?;
        }

        Ok(self.state)
    }
}
