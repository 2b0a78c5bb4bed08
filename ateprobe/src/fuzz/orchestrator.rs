//! Fuzz orchestration.
//!
//! Modules run in order and candidates run in module order. The first
//! ACCEPTED response ends the whole run, not just the current module.

use {
    crate::{
        channel::Channel,
        error::{Error, Result},
        fuzz::{
            loader::Recovery,
            module::{Candidate, FuzzModule},
        },
        is_interrupted_requested,
        port::Port,
        protocol::{Classification, Classifier, Frame},
    },
    log::{debug, info, warn},
    std::{thread, time::Duration},
};

/// Orchestrator timing and reporting policy.
#[derive(Debug, Clone)]
pub struct FuzzConfig {
    /// Minimum gap between consecutive frames, preludes included.
    pub inter_frame_delay: Duration,
    /// How long to collect a response after the settle delay.
    pub response_window: Duration,
    /// Consecutive silent probes before a streak is reported; 0 disables.
    pub silence_streak: usize,
    /// Seed for randomized modules.
    pub seed: u64,
    /// Unjam the target after a run of silent frames; `None` never does.
    pub recovery: Option<Recovery>,
}

impl Default for FuzzConfig {
    fn default() -> Self {
        Self {
            inter_frame_delay: Duration::from_millis(50),
            response_window: Duration::from_millis(1500),
            silence_streak: 32,
            seed: 0x00A7_E5EE,
            recovery: None,
        }
    }
}

/// Progress notifications emitted during a run.
#[derive(Debug)]
pub enum ProbeEvent<'a> {
    /// A module is about to send its first candidate.
    ModuleStarted {
        /// Module name.
        module: &'a str,
        /// Number of candidates it will send if nothing is accepted.
        candidates: usize,
    },
    /// One candidate was sent and classified.
    Probe {
        /// Module name.
        module: &'a str,
        /// Candidate index within the module.
        index: usize,
        /// Frame sent.
        frame: &'a Frame,
        /// Raw response.
        response: &'a [u8],
        /// Classified response.
        classification: Classification,
    },
    /// The silence streak threshold was reached.
    SilenceStreak {
        /// Module name.
        module: &'a str,
        /// Consecutive silent probes so far.
        count: usize,
    },
    /// The recovery frame was sent after a run of silent frames.
    Recovery {
        /// Module name.
        module: &'a str,
        /// Consecutive silent frames that triggered it.
        after: usize,
    },
    /// A module ran out of candidates.
    ModuleExhausted {
        /// Module name.
        module: &'a str,
        /// Probes the module sent.
        probes: usize,
    },
    /// A candidate was accepted; the run is over.
    Accepted {
        /// Module name.
        module: &'a str,
        /// Accepted frame.
        frame: &'a Frame,
        /// Response that was classified as accepted.
        response: &'a [u8],
    },
}

/// A frame the device accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// Module that produced the frame.
    pub module: String,
    /// Accepted frame.
    pub frame: Frame,
    /// Device response.
    pub response: Vec<u8>,
}

/// Send a frame and collect its response.
///
/// Writes, waits `settle`, then reads for up to `window`.
pub fn exchange<P: Port>(
    channel: &mut Channel<P>,
    frame: &Frame,
    settle: Duration,
    window: Duration,
) -> Result<Vec<u8>> {
    channel.write(frame.as_bytes())?;
    if !settle.is_zero() {
        thread::sleep(settle);
    }
    channel.read_window(window)
}

/// Runs fuzz modules against a synchronized channel.
#[derive(Debug)]
pub struct FuzzOrchestrator {
    config: FuzzConfig,
    classifier: Classifier,
    probes: usize,
}

impl FuzzOrchestrator {
    /// Create an orchestrator with the default classifier.
    pub fn new(config: FuzzConfig) -> Self {
        Self {
            config,
            classifier: Classifier::default(),
            probes: 0,
        }
    }

    /// Use a custom classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// Probes sent by the last run.
    pub fn probes(&self) -> usize {
        self.probes
    }

    /// Run `modules` until one candidate is accepted or all are exhausted.
    pub fn run<P: Port>(
        &mut self,
        channel: &mut Channel<P>,
        modules: &[FuzzModule],
        observer: &mut dyn FnMut(&ProbeEvent<'_>),
    ) -> Result<Option<Discovery>> {
        self.probes = 0;
        let mut silent = 0usize;
        let mut unanswered = 0usize;

        for module in modules {
            let name = module
                .name
                .as_str();
            info!(
                "Module {name}: {} candidates, opcode 0x{:02X}",
                module.len(),
                module.opcode
            );
            observer(&ProbeEvent::ModuleStarted {
                module: name,
                candidates: module.len(),
            });

            let mut sent = 0usize;
            for (index, candidate) in module
                .candidates()
                .enumerate()
            {
                if is_interrupted_requested() {
                    return Err(Error::Interrupted);
                }
                if self.probes > 0 && !self.config.inter_frame_delay.is_zero() {
                    thread::sleep(self.config.inter_frame_delay);
                }

                let (frame, response) = self.probe(channel, module, &candidate)?;
                self.probes += 1;
                sent += 1;

                let classification = self
                    .classifier
                    .classify(&response);
                debug!(
                    "[{name} #{index}] {frame} -> {classification} {:?}",
                    String::from_utf8_lossy(&response)
                );
                observer(&ProbeEvent::Probe {
                    module: name,
                    index,
                    frame: &frame,
                    response: &response,
                    classification,
                });

                match classification {
                    Classification::Accepted => {
                        warn!("!!! ACCEPTED !!! module {name}: {frame}");
                        warn!("!!! response: {:?}", String::from_utf8_lossy(&response));
                        observer(&ProbeEvent::Accepted {
                            module: name,
                            frame: &frame,
                            response: &response,
                        });
                        return Ok(Some(Discovery {
                            module: name.to_string(),
                            frame,
                            response,
                        }));
                    },
                    Classification::Silence => {
                        silent += 1;
                        unanswered += 1;
                        if self.config.silence_streak > 0 && silent == self.config.silence_streak {
                            warn!("{silent} silent probes in a row; the target may be wedged");
                            observer(&ProbeEvent::SilenceStreak {
                                module: name,
                                count: silent,
                            });
                        }
                        if let Some(recovery) = self
                            .config
                            .recovery
                            .as_ref()
                            .filter(|r| r.due(unanswered))
                        {
                            recovery.apply(channel)?;
                            observer(&ProbeEvent::Recovery {
                                module: name,
                                after: unanswered,
                            });
                            unanswered = 0;
                        }
                    },
                    _ => {
                        silent = 0;
                        unanswered = 0;
                    },
                }
            }

            info!("Module {name} exhausted after {sent} probes");
            observer(&ProbeEvent::ModuleExhausted {
                module: name,
                probes: sent,
            });
        }

        info!("All modules exhausted, {} probes, nothing accepted", self.probes);
        Ok(None)
    }

    fn probe<P: Port>(
        &self,
        channel: &mut Channel<P>,
        module: &FuzzModule,
        candidate: &Candidate,
    ) -> Result<(Frame, Vec<u8>)> {
        let frame = Frame::encode(candidate.opcode, &candidate.payload)?;

        if let Some(prelude) = &module.prelude {
            let reply = exchange(
                channel,
                prelude,
                module.settle,
                self.config
                    .response_window,
            )?;
            debug!("Prelude reply: {:?}", String::from_utf8_lossy(&reply));
            if !self
                .config
                .inter_frame_delay
                .is_zero()
            {
                thread::sleep(self.config.inter_frame_delay);
            }
        }

        let response = exchange(
            channel,
            &frame,
            module.settle,
            self.config
                .response_window,
        )?;
        Ok((frame, response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use {
        crate::{fuzz::module::Generator, port::scripted::ScriptedPort},
        std::{
            sync::{Arc, Mutex},
            time::Instant,
        },
    };

    fn fast_config() -> FuzzConfig {
        FuzzConfig {
            inter_frame_delay: Duration::ZERO,
            response_window: Duration::from_millis(15),
            silence_streak: 3,
            seed: 1,
            recovery: None,
        }
    }

    fn fixed(name: &str, count: u8) -> FuzzModule {
        FuzzModule::new(
            name,
            0x0D,
            Generator::Fixed {
                payloads: (0..count)
                    .map(|i| vec![i])
                    .collect(),
            },
        )
        .with_settle(Duration::ZERO)
    }

    #[test]
    fn test_early_exit_is_global() {
        let mut writes = 0;
        let port = ScriptedPort::with_responder(move |_| {
            writes += 1;
            if writes == 9 {
                b"OK 0x41".to_vec()
            } else {
                b"CMD Error\r\n".to_vec()
            }
        });
        let mut channel = Channel::new(port);
        let modules = [fixed("one", 4), fixed("two", 8), fixed("three", 5)];
        let mut started = Vec::new();
        let mut orchestrator = FuzzOrchestrator::new(fast_config());

        let discovery = orchestrator
            .run(&mut channel, &modules, &mut |event| {
                if let ProbeEvent::ModuleStarted { module, .. } = event {
                    started.push(module.to_string());
                }
            })
            .unwrap()
            .unwrap();

        assert_eq!(orchestrator.probes(), 9);
        assert_eq!(channel.port().write_count(), 9);
        assert_eq!(discovery.module, "two");
        assert_eq!(discovery.frame.payload(), &[4]);
        assert_eq!(discovery.response, b"OK 0x41");
        assert_eq!(started, vec!["one", "two"]);
    }

    #[test]
    fn test_exhausted_run_returns_none() {
        let mut channel = Channel::new(ScriptedPort::with_responder(|_| b"Preamble Error".to_vec()));
        let modules = [fixed("a", 2), fixed("b", 3)];
        let mut exhausted = Vec::new();
        let mut orchestrator = FuzzOrchestrator::new(fast_config());

        let result = orchestrator
            .run(&mut channel, &modules, &mut |event| {
                if let ProbeEvent::ModuleExhausted { module, probes } = event {
                    exhausted.push((module.to_string(), *probes));
                }
            })
            .unwrap();

        assert!(result.is_none());
        assert_eq!(orchestrator.probes(), 5);
        assert_eq!(exhausted, vec![("a".to_string(), 2), ("b".to_string(), 3)]);
    }

    #[test]
    fn test_silence_streak_reported_once() {
        let mut channel = Channel::new(ScriptedPort::silent());
        let modules = [fixed("quiet", 6)];
        let mut streaks = Vec::new();
        let mut orchestrator = FuzzOrchestrator::new(fast_config());

        orchestrator
            .run(&mut channel, &modules, &mut |event| {
                if let ProbeEvent::SilenceStreak { count, .. } = event {
                    streaks.push(*count);
                }
            })
            .unwrap();

        assert_eq!(streaks, vec![3]);
    }

    #[test]
    fn test_prelude_sent_before_each_probe() {
        let mut channel = Channel::new(ScriptedPort::silent());
        let trigger = Frame::encode(0x72, &[]).unwrap();
        let modules = [fixed("p", 2).with_prelude(trigger.clone())];
        let mut orchestrator = FuzzOrchestrator::new(fast_config());

        orchestrator
            .run(&mut channel, &modules, &mut |_| {})
            .unwrap();

        let writes = channel.port().writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[0], trigger.as_bytes());
        assert_eq!(writes[2], trigger.as_bytes());
        assert_eq!(orchestrator.probes(), 2);
    }

    #[test]
    fn test_prelude_respects_frame_gap() {
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&stamps);
        let port = ScriptedPort::with_responder(move |_| {
            log.lock()
                .unwrap()
                .push(Instant::now());
            Vec::new()
        });
        let mut channel = Channel::new(port);
        let trigger = Frame::encode(0x72, &[]).unwrap();
        let modules = [fixed("p", 2).with_prelude(trigger)];
        let gap = Duration::from_millis(40);
        let mut orchestrator = FuzzOrchestrator::new(FuzzConfig {
            inter_frame_delay: gap,
            response_window: Duration::from_millis(1),
            ..fast_config()
        });

        orchestrator
            .run(&mut channel, &modules, &mut |_| {})
            .unwrap();

        let stamps = stamps
            .lock()
            .unwrap();
        assert_eq!(stamps.len(), 4);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= gap);
        }
    }

    #[test]
    fn test_recovery_after_silent_run() {
        let mut channel = Channel::new(ScriptedPort::silent());
        let modules = [fixed("stuck", 7)];
        let mut recoveries = Vec::new();
        let mut orchestrator = FuzzOrchestrator::new(FuzzConfig {
            silence_streak: 0,
            recovery: Some(Recovery {
                pause: Duration::from_millis(1),
                ..Recovery::escape_nul()
            }),
            ..fast_config()
        });

        orchestrator
            .run(&mut channel, &modules, &mut |event| {
                if let ProbeEvent::Recovery { after, .. } = event {
                    recoveries.push(*after);
                }
            })
            .unwrap();

        assert_eq!(recoveries, vec![3, 3]);
        assert_eq!(orchestrator.probes(), 7);
        let writes = channel.port().writes();
        assert_eq!(writes.len(), 9);
        assert_eq!(writes[3], crate::fuzz::loader::RECOVERY_FRAME);
    }

    #[test]
    fn test_answer_resets_recovery_count() {
        let mut writes = 0;
        let port = ScriptedPort::with_responder(move |_| {
            writes += 1;
            if writes % 3 == 0 {
                b"CMD Error".to_vec()
            } else {
                Vec::new()
            }
        });
        let mut channel = Channel::new(port);
        let mut recovered = false;
        let mut orchestrator = FuzzOrchestrator::new(FuzzConfig {
            recovery: Some(Recovery {
                pause: Duration::from_millis(1),
                ..Recovery::escape_nul()
            }),
            ..fast_config()
        });

        orchestrator
            .run(&mut channel, &[fixed("mixed", 9)], &mut |event| {
                recovered |= matches!(event, ProbeEvent::Recovery { .. });
            })
            .unwrap();

        assert!(!recovered);
        assert_eq!(channel.port().write_count(), 9);
    }

    #[test]
    fn test_custom_classifier() {
        let mut channel = Channel::new(ScriptedPort::with_responder(|_| b"NAK".to_vec()));
        let modules = [fixed("n", 3)];
        let mut orchestrator = FuzzOrchestrator::new(fast_config())
            .with_classifier(Classifier::default().with_protocol_marker("NAK"));

        let result = orchestrator
            .run(&mut channel, &modules, &mut |_| {})
            .unwrap();

        assert!(result.is_none());
        assert_eq!(orchestrator.probes(), 3);
    }

    #[test]
    fn test_interrupt_stops_before_next_probe() {
        let mut channel = Channel::new(ScriptedPort::silent());
        let modules = [fixed("i", 4)];
        let mut orchestrator = FuzzOrchestrator::new(fast_config());

        let result = orchestrator.run(&mut channel, &modules, &mut |event| {
            if let ProbeEvent::Probe { index: 1, .. } = event {
                crate::test_set_interrupted(true);
            }
        });
        crate::test_set_interrupted(false);

        assert!(matches!(result, Err(Error::Interrupted)));
        assert_eq!(channel.port().write_count(), 2);
    }
}
