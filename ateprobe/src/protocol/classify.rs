//! Response classification.
//!
//! A response is whatever bytes arrived within the read window after a
//! write. Classification looks only for literal markers; it never tries to
//! parse the device's text.

use std::fmt;

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    /// Nothing came back. Ambiguous: ignored, swallowed, or still busy.
    Silence,
    /// The device rejected the framing itself.
    ProtocolError,
    /// The framing was understood but the command was rejected.
    CommandError,
    /// A non-empty reply with no rejection marker.
    Accepted,
}

impl Classification {
    /// Whether this outcome ends a fuzzing run.
    pub fn is_accepted(self) -> bool {
        self == Self::Accepted
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Silence => "SILENCE",
            Self::ProtocolError => "PROTOCOL_ERROR",
            Self::CommandError => "COMMAND_ERROR",
            Self::Accepted => "ACCEPTED",
        })
    }
}

/// Markers the stock firmware prints when a command is rejected.
pub const COMMAND_ERROR_MARKERS: &[&str] = &["CMD Error", "CMD"];

/// Markers the stock firmware prints when framing is malformed.
pub const PROTOCOL_ERROR_MARKERS: &[&str] = &["Preamble", "Rx Buf Full", "Error"];

/// Literal-marker classifier.
///
/// Command markers are checked before protocol markers, so `"CMD Error"`
/// is a command rejection even though it also contains `"Error"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classifier {
    command_markers: Vec<Vec<u8>>,
    protocol_markers: Vec<Vec<u8>>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(COMMAND_ERROR_MARKERS, PROTOCOL_ERROR_MARKERS)
    }
}

impl Classifier {
    /// Build a classifier from explicit marker sets.
    pub fn new<S: AsRef<[u8]>>(command_markers: &[S], protocol_markers: &[S]) -> Self {
        Self {
            command_markers: command_markers
                .iter()
                .map(|m| m.as_ref().to_vec())
                .collect(),
            protocol_markers: protocol_markers
                .iter()
                .map(|m| m.as_ref().to_vec())
                .collect(),
        }
    }

    /// Add a command-rejection marker.
    #[must_use]
    pub fn with_command_marker(mut self, marker: impl AsRef<[u8]>) -> Self {
        self.command_markers
            .push(marker.as_ref().to_vec());
        self
    }

    /// Add a framing-rejection marker.
    #[must_use]
    pub fn with_protocol_marker(mut self, marker: impl AsRef<[u8]>) -> Self {
        self.protocol_markers
            .push(marker.as_ref().to_vec());
        self
    }

    /// Classify a response. Total over all inputs.
    pub fn classify(&self, response: &[u8]) -> Classification {
        if response.is_empty() {
            Classification::Silence
        } else if contains_any(response, &self.command_markers) {
            Classification::CommandError
        } else if contains_any(response, &self.protocol_markers) {
            Classification::ProtocolError
        } else {
            Classification::Accepted
        }
    }
}

/// Classify with the default marker sets.
pub fn classify(response: &[u8]) -> Classification {
    Classifier::default().classify(response)
}

/// Whether `needle` occurs anywhere in `haystack`.
pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty()
        || haystack
            .windows(needle.len())
            .any(|w| w == needle)
}

fn contains_any(haystack: &[u8], needles: &[Vec<u8>]) -> bool {
    needles
        .iter()
        .any(|n| contains(haystack, n))
}
