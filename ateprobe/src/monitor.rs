//! Freeze watchdog.
//!
//! Some probes wedge the target's UART task. The monitor watches the
//! channel's [`ActivityClock`] from its own thread and, after a long enough
//! silence, pulses DTR to kick the target. It holds only a
//! [`ControlLine`], so it never touches the data stream.

use {
    crate::{channel::ActivityClock, error::Result, port::ControlLine},
    log::{debug, warn},
    std::{
        sync::{
            Arc,
            atomic::{AtomicBool, AtomicUsize, Ordering},
        },
        thread::{self, JoinHandle},
        time::Duration,
    },
};

/// Longest sleep between stop-flag checks.
const STOP_CHECK: Duration = Duration::from_millis(50);

/// Watchdog timing.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Idle time that counts as a freeze.
    pub freeze_timeout: Duration,
    /// How often the clock is checked.
    pub poll_interval: Duration,
    /// How long DTR is held low.
    pub pulse_width: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            freeze_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_secs(1),
            pulse_width: Duration::from_millis(200),
        }
    }
}

/// Handle to a running watchdog thread. Dropping it stops the thread.
pub struct LivenessMonitor {
    stop: Arc<AtomicBool>,
    recoveries: Arc<AtomicUsize>,
    handle: Option<JoinHandle<()>>,
}

impl LivenessMonitor {
    /// Start watching `clock`.
    pub fn spawn(
        clock: ActivityClock,
        mut control: Box<dyn ControlLine>,
        config: MonitorConfig,
    ) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let recoveries = Arc::new(AtomicUsize::new(0));

        let thread_stop = Arc::clone(&stop);
        let thread_recoveries = Arc::clone(&recoveries);
        let handle = thread::Builder::new()
            .name("liveness-monitor".into())
            .spawn(move || {
                debug!(
                    "Liveness monitor started, freeze timeout {}ms",
                    config
                        .freeze_timeout
                        .as_millis()
                );
                while !thread_stop.load(Ordering::Relaxed) {
                    nap(config.poll_interval, &thread_stop);
                    if thread_stop.load(Ordering::Relaxed) {
                        break;
                    }
                    if clock.idle() <= config.freeze_timeout {
                        continue;
                    }

                    warn!(
                        "[FREEZE] no UART activity for {:.1}s, pulsing DTR",
                        clock
                            .idle()
                            .as_secs_f32()
                    );
                    if let Err(e) = pulse(control.as_mut(), config.pulse_width) {
                        warn!("DTR pulse failed: {e}");
                    }
                    clock.touch();
                    thread_recoveries.fetch_add(1, Ordering::Relaxed);
                }
                debug!("Liveness monitor stopped");
            })?;

        Ok(Self {
            stop,
            recoveries,
            handle: Some(handle),
        })
    }

    /// Recoveries performed so far.
    pub fn recoveries(&self) -> usize {
        self.recoveries
            .load(Ordering::Relaxed)
    }

    /// Stop the thread and return the number of recoveries.
    pub fn stop(mut self) -> usize {
        self.shutdown();
        self.recoveries()
    }

    fn shutdown(&mut self) {
        self.stop
            .store(true, Ordering::Relaxed);
        if let Some(handle) = self
            .handle
            .take()
        {
            let _ = handle.join();
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn pulse(control: &mut dyn ControlLine, width: Duration) -> Result<()> {
    control.set_dtr(false)?;
    thread::sleep(width);
    control.set_dtr(true)
}

/// Sleep for `total`, waking early if `stop` is raised.
fn nap(total: Duration, stop: &AtomicBool) {
    let mut left = total;
    while !left.is_zero() && !stop.load(Ordering::Relaxed) {
        let step = left.min(STOP_CHECK);
        thread::sleep(step);
        left -= step;
    }
}
