//! # ateprobe
//!
//! A library for reverse-engineering the factory test (ATE) serial protocol
//! of embedded camera modules.
//!
//! The device exposes an undocumented framed command protocol once it has
//! been driven through its boot prompt, plus a text console for reading and
//! writing 8-bit registers. This crate provides:
//!
//! - Boot prompt synchronization into ATE, debug, CMOS or bootloader modes
//! - The two frame families and their checksums (CRC-16/MODBUS and friends)
//! - Response classification
//! - A fuzzing engine with early exit on the first accepted frame
//! - Checksum discovery and bad-character search
//! - Bootloader memory-read sweeps with ESC-NUL recovery
//! - Register scanning, snapshots and offline differential analysis
//! - A DTR watchdog that recovers frozen devices
//!
//! ## Features
//!
//! - `native` (default): serial port support via the `serialport` crate
//!
//! ## Example
//!
//! ```rust,no_run
//! use ateprobe::{
//!     BootSynchronizer, FuzzModule, FuzzOrchestrator, SessionConfig, TargetMode,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let config = SessionConfig::new("/dev/ttyUSB0", 115200);
//!         let mut channel = config.open()?;
//!
//!         BootSynchronizer::new(config.boot.clone()).synchronize(&mut channel, TargetMode::Ate)?;
//!
//!         let modules = FuzzModule::standard_suite(0x0D);
//!         let found = FuzzOrchestrator::new(config.fuzz.clone()).run(
//!             &mut channel,
//!             &modules,
//!             &mut |_| {},
//!         )?;
//!         if let Some(hit) = found {
//!             println!("{} accepted {}", hit.module, hit.frame);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod boot;
pub mod channel;
pub mod config;
pub mod diff;
pub mod error;
pub mod fuzz;
pub mod monitor;
pub mod port;
pub mod protocol;
pub mod scan;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
thread_local! {
    static TEST_INTERRUPTED: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Per-thread interruption flag, so one test cannot stop another.
#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    set_interrupt_checker(|| TEST_INTERRUPTED.with(std::cell::Cell::get));
    TEST_INTERRUPTED.with(|flag| flag.set(value));
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    boot::{BootConfig, BootSynchronizer, SessionState, TargetMode},
    channel::{ActivityClock, Channel},
    config::SessionConfig,
    diff::{RegisterChange, StaticDiff, TriageReport, diff_static, diff_tweak},
    error::{Error, Result},
    fuzz::{
        BadCharConfig, ChecksumDiscovery, Coverage, Discovery, FuzzConfig, FuzzModule,
        FuzzOrchestrator, MemDumpConfig, ProbeEvent, Recovery, find_bad_chars, sweep_memdump,
    },
    monitor::{LivenessMonitor, MonitorConfig},
    port::{ControlLine, Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{ChecksumAlgorithm, Classification, Classifier, Frame, FrameSpec, classify},
    scan::{RegisterMap, RegisterScanner, RegisterValue, ScanConfig},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_flag_is_per_thread() {
        test_set_interrupted(true);
        let other = std::thread::spawn(|| {
            test_set_interrupted(false);
            is_interrupted_requested()
        })
        .join()
        .unwrap();
        assert!(!other);
        assert!(is_interrupted_requested());
        test_set_interrupted(false);
    }
}
