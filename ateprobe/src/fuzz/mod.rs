//! Fuzzing engine: search-space modules, the orchestrator, checksum
//! discovery, the bad-character search and the loader memory-read sweep.

pub mod badchar;
pub mod checksum;
pub mod loader;
pub mod module;
pub mod orchestrator;
pub mod pattern;

pub use {
    badchar::{BadChar, BadCharConfig, BadCharReport, find_bad_chars},
    checksum::{AlgorithmTrial, BruteForce, ChecksumDiscovery, ChecksumFinding, Coverage},
    loader::{
        MemDumpConfig, MemDumpReply, MemDumpReport, RECOVERY_FRAME, Recovery, memdump_frame,
        sweep_memdump,
    },
    module::{Candidate, FuzzModule, Generator, PayloadTemplate},
    orchestrator::{Discovery, FuzzConfig, FuzzOrchestrator, ProbeEvent, exchange},
    pattern::{cyclic_offset, cyclic_pattern, de_bruijn},
};
