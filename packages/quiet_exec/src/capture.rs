//! Which output streams end up in the returned text.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capture policy shared by both runners.
///
/// | Policy   | Captured text               | PTY live echo |
/// |----------|-----------------------------|---------------|
/// | `None`   | empty                       | yes           |
/// | `Stdout` | stdout only                 | no            |
/// | `Stderr` | stderr only                 | no            |
/// | `Both`   | stdout + stderr, by arrival | no            |
///
/// A PTY merges stdout and stderr into one terminal stream, so the PTY runner
/// captures that merged stream for every policy except `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capture {
    None,
    Stdout,
    Stderr,
    #[default]
    Both,
}

impl Capture {
    pub const ALL: [Capture; 4] = [Capture::None, Capture::Stdout, Capture::Stderr, Capture::Both];

    pub fn captures_stdout(self) -> bool {
        matches!(self, Capture::Stdout | Capture::Both)
    }

    pub fn captures_stderr(self) -> bool {
        matches!(self, Capture::Stderr | Capture::Both)
    }

    pub fn is_none(self) -> bool {
        self == Capture::None
    }

    /// Whether the PTY runner copies output to the invoking terminal as it arrives.
    pub fn mirrors_pty_output(self) -> bool {
        self.is_none()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Capture::None => "none",
            Capture::Stdout => "stdout",
            Capture::Stderr => "stderr",
            Capture::Both => "both",
        }
    }
}

impl fmt::Display for Capture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown capture policy name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capture policy `{0}` (expected none, stdout, stderr or both)")]
pub struct ParseCaptureError(String);

impl FromStr for Capture {
    type Err = ParseCaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Capture::None),
            "stdout" => Ok(Capture::Stdout),
            "stderr" => Ok(Capture::Stderr),
            "both" => Ok(Capture::Both),
            _ => Err(ParseCaptureError(s.to_string())),
        }
    }
}

/// Which pipe a chunk of output came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub(crate) fn is_captured_by(self, capture: Capture) -> bool {
        match self {
            Stream::Stdout => capture.captures_stdout(),
            Stream::Stderr => capture.captures_stderr(),
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}
