//! Error taxonomy for a recording run.
//!
//! Every per-video failure maps to exactly one [`FailureReason`], which is what
//! ends up in the run statistics and the final summary. Only connection errors
//! are fatal to the whole run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::browser::BrowserError;
use crate::capture::CaptureError;

/// Result type alias using RecordingError
pub type RecordingResult<T> = Result<T, RecordingError>;

#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Connection lost: {0}")]
    Connection(String),

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Playback did not finish within {waited_secs}s (last position {last_position_secs}s)")]
    PlaybackTimeout { waited_secs: u64, last_position_secs: u64 },

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Recorder error: {0}")]
    Capture(String),

    #[error("No new recording appeared in {} after {attempts} attempts", dir.display())]
    FileNotFound { dir: PathBuf, attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl RecordingError {
    /// Whether the error must abort the run instead of failing one video
    pub fn is_fatal(&self) -> bool {
        matches!(self, RecordingError::Connection(_))
    }

    /// Reason code recorded in the run statistics
    pub fn reason(&self) -> FailureReason {
        match self {
            RecordingError::Connection(_) => FailureReason::Connection,
            RecordingError::Navigation(_) => FailureReason::Navigation,
            RecordingError::PlaybackTimeout { .. } => FailureReason::PlaybackTimeout,
            RecordingError::Playback(_) => FailureReason::PlaybackError,
            RecordingError::Capture(_) | RecordingError::InvalidTransition { .. } => {
                FailureReason::Capture
            }
            RecordingError::FileNotFound { .. } => FailureReason::FileNotFound,
            RecordingError::Io(_) => FailureReason::Io,
        }
    }

    /// Map a recorder error, promoting disconnects to fatal connection errors
    pub fn from_capture(context: &str, error: CaptureError) -> Self {
        if error.is_disconnect() {
            RecordingError::Connection(format!("{}: {}", context, error))
        } else {
            RecordingError::Capture(format!("{}: {}", context, error))
        }
    }

    /// Map a browser error, promoting disconnects to fatal connection errors
    pub fn from_browser(context: &str, error: BrowserError) -> Self {
        if error.is_disconnect() {
            RecordingError::Connection(format!("{}: {}", context, error))
        } else {
            RecordingError::Navigation(format!("{}: {}", context, error))
        }
    }
}

/// Reason code attached to a failed video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    Connection,
    Navigation,
    PlaybackTimeout,
    PlaybackError,
    Capture,
    FileNotFound,
    Io,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::Connection => "connection",
            FailureReason::Navigation => "navigation",
            FailureReason::PlaybackTimeout => "playback-timeout",
            FailureReason::PlaybackError => "playback-error",
            FailureReason::Capture => "capture",
            FailureReason::FileNotFound => "file-not-found",
            FailureReason::Io => "io",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
