/// Course Recorder
///
/// Records sequences of web-hosted videos by driving a Chromium browser over
/// the DevTools protocol and OBS over obs-websocket, then files each capture
/// under its module folder.

pub mod browser;
pub mod capture;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod finalizer;
pub mod listing;
pub mod monitor;
pub mod pipeline;
pub mod state;
pub mod stats;

// Re-export main types for easy access
pub use crate::browser::{BrowserController, BrowserError, ChromiumBrowser, PlaybackSnapshot};
pub use crate::capture::{CaptureController, CaptureError, ObsClient, RecordStatus};
pub use crate::config::{Config, ConfigBuilder};
pub use crate::coordinator::{RecordingCoordinator, RecordingOutcome};
pub use crate::error::{FailureReason, RecordingError, RecordingResult};
pub use crate::finalizer::{sanitize_file_name, FileFinalizer, FinalizedFile};
pub use crate::listing::{ListingError, ListingParser, Module, VideoTask};
pub use crate::monitor::{PlaybackMonitor, PlaybackResult, Termination};
pub use crate::pipeline::{RecordingPipeline, RunReport};
pub use crate::state::{RecordingSession, SessionSlot, SessionStatus};
pub use crate::stats::{FailureRecord, RunStatistics};
