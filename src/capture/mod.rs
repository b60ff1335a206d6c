/// Capture Controller: the external recording application
///
/// The recorder is treated as a start/stop actuator only. Playback state is
/// never inferred from it.

pub mod obs;
pub mod protocol;

pub use obs::ObsClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Cannot connect to recorder at {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Recorder authentication failed: {0}")]
    Authentication(String),

    #[error("Recorder connection closed")]
    Disconnected,

    #[error("Request {0} timed out")]
    Timeout(String),

    #[error("Request {request} failed with code {code}: {comment}")]
    Request {
        request: String,
        code: i64,
        comment: String,
    },

    #[error("Unexpected recorder message: {0}")]
    Protocol(String),
}

impl CaptureError {
    /// Whether the control channel itself is gone
    pub fn is_disconnect(&self) -> bool {
        matches!(self, CaptureError::Connect { .. } | CaptureError::Disconnected)
    }
}

pub type CaptureResult<T> = Result<T, CaptureError>;

/// Versions reported by the recorder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderVersion {
    pub recorder: String,
    pub protocol: String,
}

/// Snapshot of the recorder's output
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordStatus {
    pub active: bool,
    pub paused: bool,
    pub timecode: Option<String>,
    pub bytes: Option<u64>,
}

/// Operations consumed from the recording application
#[async_trait]
pub trait CaptureController: Send + Sync {
    async fn version(&self) -> CaptureResult<RecorderVersion>;

    async fn start_recording(&self) -> CaptureResult<()>;

    /// Stop the recording, returning the output file when the recorder reports it
    async fn stop_recording(&self) -> CaptureResult<Option<PathBuf>>;

    async fn record_status(&self) -> CaptureResult<RecordStatus>;

    async fn is_recording(&self) -> CaptureResult<bool> {
        Ok(self.record_status().await?.active)
    }

    async fn set_output_directory(&self, dir: &Path) -> CaptureResult<()>;

    async fn output_directory(&self) -> CaptureResult<PathBuf>;
}
