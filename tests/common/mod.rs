//! In-memory stand-ins for the browser and the recorder.

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use course_recorder::browser::{BrowserController, BrowserError, BrowserResult, PlaybackSnapshot};
use course_recorder::capture::{CaptureController, CaptureError, CaptureResult, RecordStatus, RecorderVersion};
use course_recorder::config::{Config, ConfigBuilder};

/// How the fake media element behaves
#[derive(Debug, Clone, Copy)]
pub enum Playback {
    /// Position advances by this many seconds per poll
    Advancing(f64),

    /// Position never moves and `ended` is never set
    Stalled,

    /// Every browser call hangs forever
    Hang,
}

pub struct FakeBrowser {
    playback: Playback,
    duration_text: Option<String>,
    opened: Mutex<Vec<String>>,
    position: Mutex<f64>,
}

impl FakeBrowser {
    pub fn new(playback: Playback) -> Arc<Self> {
        Arc::new(Self {
            playback,
            duration_text: Some("0:20".to_string()),
            opened: Mutex::new(Vec::new()),
            position: Mutex::new(0.0),
        })
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }

    async fn hang_if_needed(&self) {
        if matches!(self.playback, Playback::Hang) {
            std::future::pending::<()>().await;
        }
    }

    fn current(&self) -> BrowserResult<String> {
        self.opened
            .lock()
            .unwrap()
            .last()
            .cloned()
            .ok_or(BrowserError::NoPage)
    }
}

#[async_trait]
impl BrowserController for FakeBrowser {
    async fn open(&self, url: &str) -> BrowserResult<()> {
        self.hang_if_needed().await;
        self.opened.lock().unwrap().push(url.to_string());
        *self.position.lock().unwrap() = 0.0;
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<Option<String>> {
        self.hang_if_needed().await;
        Ok(Some(self.current()?))
    }

    async fn ready_state(&self) -> BrowserResult<String> {
        self.hang_if_needed().await;
        Ok("complete".to_string())
    }

    async fn video_title(&self) -> BrowserResult<Option<String>> {
        self.hang_if_needed().await;
        let count = self.opened.lock().unwrap().len();
        Ok(Some(format!("Lesson {}: Guard Basics", count)))
    }

    async fn duration_text(&self) -> BrowserResult<Option<String>> {
        self.hang_if_needed().await;
        Ok(self.duration_text.clone())
    }

    async fn playback_state(&self) -> BrowserResult<PlaybackSnapshot> {
        self.hang_if_needed().await;
        let mut position = self.position.lock().unwrap();
        if let Playback::Advancing(step) = self.playback {
            *position += step;
        }
        Ok(PlaybackSnapshot {
            position: *position,
            duration: Some(20.0),
            has_media: true,
            ready_state: 4,
            ..PlaybackSnapshot::default()
        })
    }

    async fn dismiss_overlays(&self) -> BrowserResult<u32> {
        self.hang_if_needed().await;
        Ok(0)
    }

    async fn play(&self) -> BrowserResult<()> {
        self.hang_if_needed().await;
        Ok(())
    }

    async fn enter_fullscreen(&self) -> BrowserResult<()> {
        self.hang_if_needed().await;
        Ok(())
    }

    async fn exit_fullscreen(&self) -> BrowserResult<()> {
        self.hang_if_needed().await;
        Ok(())
    }

    async fn close_tab(&self) -> BrowserResult<()> {
        self.hang_if_needed().await;
        Ok(())
    }
}

/// Recorder that writes a capture file into its output directory on stop
pub struct FakeCapture {
    recording: AtomicBool,
    disconnected: AtomicBool,
    writes_files: bool,
    file_size: usize,
    output_dir: Mutex<Option<PathBuf>>,
    events: Mutex<Vec<&'static str>>,
    captures: AtomicUsize,
    overlaps: AtomicUsize,
}

impl FakeCapture {
    pub fn new() -> Arc<Self> {
        Self::build(true, 1024)
    }

    /// Recorder that never produces a file
    pub fn without_files() -> Arc<Self> {
        Self::build(false, 0)
    }

    pub fn with_file_size(size: usize) -> Arc<Self> {
        Self::build(true, size)
    }

    fn build(writes_files: bool, file_size: usize) -> Arc<Self> {
        Arc::new(Self {
            recording: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
            writes_files,
            file_size,
            output_dir: Mutex::new(None),
            events: Mutex::new(Vec::new()),
            captures: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
        })
    }

    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Pretend a recording was left running
    pub fn leave_running(&self) {
        self.recording.store(true, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().clone()
    }

    /// Starts requested while another capture was running
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn check_connection(&self) -> CaptureResult<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            Err(CaptureError::Disconnected)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CaptureController for FakeCapture {
    async fn version(&self) -> CaptureResult<RecorderVersion> {
        self.check_connection()?;
        Ok(RecorderVersion {
            recorder: "30.1.2".to_string(),
            protocol: "5.4.2".to_string(),
        })
    }

    async fn start_recording(&self) -> CaptureResult<()> {
        self.check_connection()?;
        if self.recording.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.events.lock().unwrap().push("start");
        Ok(())
    }

    async fn stop_recording(&self) -> CaptureResult<Option<PathBuf>> {
        self.check_connection()?;
        self.events.lock().unwrap().push("stop");
        if !self.recording.swap(false, Ordering::SeqCst) {
            return Err(CaptureError::Request {
                request: "StopRecord".to_string(),
                code: 501,
                comment: "output not active".to_string(),
            });
        }

        if !self.writes_files {
            return Ok(None);
        }

        let dir = self.output_dir.lock().unwrap().clone();
        let Some(dir) = dir else {
            return Ok(None);
        };
        let number = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        let path = dir.join(format!("2024-05-01 10-00-{:02}.mp4", number));
        std::fs::write(&path, vec![0u8; self.file_size]).map_err(|e| CaptureError::Protocol(e.to_string()))?;
        Ok(Some(path))
    }

    async fn record_status(&self) -> CaptureResult<RecordStatus> {
        self.check_connection()?;
        Ok(RecordStatus {
            active: self.recording.load(Ordering::SeqCst),
            ..RecordStatus::default()
        })
    }

    async fn set_output_directory(&self, dir: &Path) -> CaptureResult<()> {
        self.check_connection()?;
        *self.output_dir.lock().unwrap() = Some(dir.to_path_buf());
        Ok(())
    }

    async fn output_directory(&self) -> CaptureResult<PathBuf> {
        self.check_connection()?;
        Ok(self.output_dir.lock().unwrap().clone().unwrap_or_default())
    }
}

/// Configuration with short file retries rooted at `base_dir`
pub fn test_config(base_dir: &Path) -> Config {
    let mut config = ConfigBuilder::new()
        .with_output_dir(base_dir.to_path_buf())
        .build();
    config.files.release_delay_ms = 0;
    config.files.retry_attempts = 3;
    config.files.retry_initial_delay_ms = 10;
    config.files.retry_max_delay_ms = 20;
    config.output.results_file = None;
    config
}

pub const LISTING: &str = "\
# MOD01
https://www.youtube.com/watch?v=first
https://www.youtube.com/watch?v=second

# MOD02
https://www.youtube.com/watch?v=third
";
