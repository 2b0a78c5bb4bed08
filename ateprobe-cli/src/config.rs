//! Configuration file support for ateprobe.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (ATEPROBE_*)
//! 3. Local config file (./ateprobe.toml)
//! 4. Global config file (~/.config/ateprobe/config.toml)
//!
//! ```toml
//! [connection]
//! port = "/dev/ttyUSB0"
//! baud = 115200
//!
//! [timing]
//! prompt_timeout_ms = 20000
//! response_window_ms = 1500
//!
//! [fuzz]
//! seed = 42
//! ```

use {
    ateprobe::{SessionConfig, config::millis},
    directories::ProjectDirs,
    log::{debug, warn},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
    },
};

/// Name of the per-directory config file.
pub const LOCAL_CONFIG: &str = "ateprobe.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Timing overrides, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Wait for the boot prompt.
    pub prompt_timeout_ms: Option<u64>,
    /// Wait for the mode's ready banner.
    pub ready_timeout_ms: Option<u64>,
    /// Banner drained after the handshake.
    pub post_sync_drain_ms: Option<u64>,
    /// Gap between consecutive frames in fuzz, crc, badchars and memdump.
    pub inter_frame_delay_ms: Option<u64>,
    /// Fuzz response window.
    pub response_window_ms: Option<u64>,
    /// Register reply timeout.
    pub reply_timeout_ms: Option<u64>,
    /// Idle time before the watchdog pulses DTR.
    pub freeze_timeout_ms: Option<u64>,
}

/// Fuzzing defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FuzzSection {
    /// Seed for randomized modules.
    pub seed: Option<u64>,
    /// Silent probes in a row before a warning.
    pub silence_streak: Option<usize>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Timing overrides.
    #[serde(default)]
    pub timing: TimingConfig,
    /// Fuzzing defaults.
    #[serde(default)]
    pub fuzz: FuzzSection,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG)) {
            debug!("Loaded local config from {LOCAL_CONFIG}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML config {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "ateprobe").map(|dirs| {
            dirs.config_dir()
                .to_path_buf()
        })
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Set values override unset ones.
    fn merge(&mut self, other: Self) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.connection.port, other.connection.port);
        take(&mut self.connection.baud, other.connection.baud);

        let t = other.timing;
        take(&mut self.timing.prompt_timeout_ms, t.prompt_timeout_ms);
        take(&mut self.timing.ready_timeout_ms, t.ready_timeout_ms);
        take(&mut self.timing.post_sync_drain_ms, t.post_sync_drain_ms);
        take(&mut self.timing.inter_frame_delay_ms, t.inter_frame_delay_ms);
        take(&mut self.timing.response_window_ms, t.response_window_ms);
        take(&mut self.timing.reply_timeout_ms, t.reply_timeout_ms);
        take(&mut self.timing.freeze_timeout_ms, t.freeze_timeout_ms);

        take(&mut self.fuzz.seed, other.fuzz.seed);
        take(&mut self.fuzz.silence_streak, other.fuzz.silence_streak);
    }

    /// Build the library session config for `port`.
    pub fn session(&self, port: &str, baud: u32) -> SessionConfig {
        let mut session = SessionConfig::new(port, baud);
        let t = &self.timing;

        if let Some(ms) = t.prompt_timeout_ms {
            session.boot.prompt_timeout = millis(ms);
        }
        if let Some(ms) = t.ready_timeout_ms {
            session.boot.ready_timeout = millis(ms);
        }
        if let Some(ms) = t.post_sync_drain_ms {
            session.boot.post_sync_drain = millis(ms);
        }
        if let Some(ms) = t.inter_frame_delay_ms {
            session.fuzz.inter_frame_delay = millis(ms);
        }
        if let Some(ms) = t.response_window_ms {
            session.fuzz.response_window = millis(ms);
        }
        if let Some(ms) = t.reply_timeout_ms {
            session.scan.reply_timeout = millis(ms);
        }
        if let Some(ms) = t.freeze_timeout_ms {
            session.monitor.freeze_timeout = millis(ms);
        }
        if let Some(seed) = self.fuzz.seed {
            session.fuzz.seed = seed;
        }
        if let Some(streak) = self.fuzz.silence_streak {
            session.fuzz.silence_streak = streak;
        }

        session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.connection.port.is_none());
        assert!(config.connection.baud.is_none());
        assert!(config.timing.prompt_timeout_ms.is_none());
        assert!(config.fuzz.seed.is_none());
    }

    #[test]
    fn test_config_merge_port() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.connection.port = Some("/dev/ttyUSB0".to_string());
        other.fuzz.seed = Some(7);

        base.merge(other);

        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.fuzz.seed, Some(7));
    }

    #[test]
    fn test_config_merge_does_not_overwrite_with_none() {
        let mut base = Config::default();
        base.connection.port = Some("/dev/ttyUSB0".to_string());
        base.timing.reply_timeout_ms = Some(500);

        base.merge(Config::default());

        assert_eq!(base.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(base.timing.reply_timeout_ms, Some(500));
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r#"
[connection]
port = "/dev/ttyUSB0"
baud = 57600

[timing]
prompt_timeout_ms = 5000
freeze_timeout_ms = 8000

[fuzz]
seed = 42
silence_streak = 10
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.connection.baud, Some(57600));
        assert_eq!(config.timing.prompt_timeout_ms, Some(5000));
        assert_eq!(config.fuzz.silence_streak, Some(10));
    }

    #[test]
    fn test_config_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.connection.port.is_none());
        assert!(config.timing.response_window_ms.is_none());
    }

    #[test]
    fn test_session_applies_overrides() {
        let mut config = Config::default();
        config.timing.prompt_timeout_ms = Some(5000);
        config.timing.response_window_ms = Some(300);
        config.fuzz.seed = Some(99);

        let session = config.session("/dev/ttyUSB0", 115200);

        assert_eq!(session.boot.prompt_timeout, Duration::from_secs(5));
        assert_eq!(session.fuzz.response_window, Duration::from_millis(300));
        assert_eq!(session.fuzz.seed, 99);
        // Untouched sections keep library defaults
        assert_eq!(session.scan.reply_timeout, Duration::from_secs(1));
        assert_eq!(session.port.port_name, "/dev/ttyUSB0");
    }

    #[test]
    fn test_load_from_path_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("probe.toml");
        fs::write(
            &path,
            r#"
[connection]
port = "/dev/ttyUSB1"
[timing]
reply_timeout_ms = 250
"#,
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.timing.reply_timeout_ms, Some(250));
    }

    #[test]
    fn test_load_from_path_invalid_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir
            .path()
            .join("broken.toml");
        fs::write(&path, "invalid toml [[[").unwrap();

        let config = Config::load_from_path(&path);
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn test_load_from_path_nonexistent() {
        let config = Config::load_from_path(Path::new("/nonexistent/path/config.toml"));
        assert!(config.connection.port.is_none());
    }

    #[test]
    fn test_global_config_path_is_some() {
        if let Some(p) = Config::global_config_path() {
            let text = p
                .to_str()
                .unwrap();
            assert!(text.contains("ateprobe"));
            assert!(text.ends_with("config.toml"));
        }
    }
}
