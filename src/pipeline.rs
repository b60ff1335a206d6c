//! Pipeline Driver: walks the modules in order, records every video, and
//! keeps the run statistics.

use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{error, info, warn};

use crate::browser::BrowserController;
use crate::capture::CaptureController;
use crate::config::Config;
use crate::coordinator::{RecordingCoordinator, RecordingOutcome};
use crate::error::{FailureReason, RecordingError, RecordingResult};
use crate::finalizer::FileFinalizer;
use crate::listing::{Module, VideoTask};
use crate::monitor::Termination;
use crate::stats::{FailureRecord, RunStatistics};

/// One video as written to the results file
#[derive(Debug, Clone, Serialize)]
pub struct VideoEntry {
    pub module: String,

    #[serde(flatten)]
    pub task: VideoTask,

    pub termination: Option<Termination>,
    pub failure: Option<FailureReason>,
}

/// Content of the results file
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub trial: bool,

    /// Stopped by the user
    pub interrupted: bool,

    /// Reason the run ended early on its own
    pub aborted: Option<FailureReason>,

    pub statistics: RunStatistics,
    pub videos: Vec<VideoEntry>,
}

#[derive(Debug, Default)]
struct RunProgress {
    stats: RunStatistics,
    videos: Vec<VideoEntry>,
    started_at: Option<DateTime<Local>>,
}

pub struct RecordingPipeline {
    coordinator: RecordingCoordinator,
    capture: Arc<dyn CaptureController>,
    finalizer: FileFinalizer,
    progress: Mutex<RunProgress>,
    config: Config,
}

impl RecordingPipeline {
    pub fn new(
        browser: Arc<dyn BrowserController>,
        capture: Arc<dyn CaptureController>,
        config: Config,
    ) -> Self {
        Self {
            coordinator: RecordingCoordinator::new(browser, Arc::clone(&capture), config.clone()),
            capture,
            finalizer: FileFinalizer::new(config.files.clone(), config.trial.clone()),
            progress: Mutex::new(RunProgress::default()),
            config,
        }
    }

    pub fn coordinator(&self) -> &RecordingCoordinator {
        &self.coordinator
    }

    /// Statistics so far; complete once `run` returned
    pub async fn statistics(&self) -> RunStatistics {
        self.progress.lock().await.stats.clone()
    }

    /// Record every video of every module.
    ///
    /// Per-video failures are counted and the run goes on. A lost connection
    /// or a module folder the recorder cannot be pointed at ends the run.
    pub async fn run(&self, modules: &[Module]) -> RecordingResult<RunStatistics> {
        *self.progress.lock().await = RunProgress {
            started_at: Some(Local::now()),
            ..RunProgress::default()
        };

        let run_start = Instant::now();
        let total: usize = modules.iter().map(|m| m.videos.len()).sum();
        info!("🚀 Starting recording run: {} module(s), {} video(s)", modules.len(), total);
        if self.config.trial.enabled {
            info!("🧪 Trial mode enabled");
        }

        let result = self.run_modules(modules, total).await;

        if let Err(e) = &result {
            error!("Run aborted: {}", e);
        }
        let aborted = result.as_ref().err().map(RecordingError::reason);
        if let Err(e) = self.write_results(false, aborted).await {
            warn!("Could not write results file: {}", e);
        }

        let stats = self.statistics().await;
        info!(
            "🏁 Run finished in {:.1}s: {} recorded, {} failed",
            run_start.elapsed().as_secs_f64(),
            stats.processed,
            stats.failed
        );
        result.map(|_| stats)
    }

    async fn run_modules(&self, modules: &[Module], total: usize) -> RecordingResult<()> {
        let mut position = 0;

        for module in modules.iter().filter(|m| !m.videos.is_empty()) {
            let module_dir = module.output_dir(&self.config.output.base_dir);
            self.prepare_module(module, &module_dir).await?;

            for video in &module.videos {
                position += 1;
                info!("📹 Video {}/{}: {} #{:02}", position, total, module.name, video.index);

                let mut task = video.clone();
                self.record_video(module, &module_dir, &mut task).await?;

                if position < total {
                    sleep(Duration::from_millis(self.config.recording.pause_between_videos_ms)).await;
                }
            }
        }

        Ok(())
    }

    /// Create the module folder and point the recorder at it
    async fn prepare_module(&self, module: &Module, module_dir: &Path) -> RecordingResult<()> {
        info!("📂 Module '{}' ({} video(s))", module.name, module.videos.len());
        tokio::fs::create_dir_all(module_dir).await?;

        let absolute = tokio::fs::canonicalize(module_dir).await?;
        let request_timeout = self.config.capture.request_timeout();
        match timeout(request_timeout, self.capture.set_output_directory(&absolute)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(RecordingError::from_capture("set output directory", e)),
            Err(_) => Err(RecordingError::Capture(format!(
                "set output directory timed out after {}s",
                request_timeout.as_secs()
            ))),
        }
    }

    async fn record_video(&self, module: &Module, module_dir: &Path, task: &mut VideoTask) -> RecordingResult<()> {
        match self.coordinator.process(task).await {
            Ok(outcome) => {
                let termination = outcome.playback.termination;
                let failure = self.finalize(module, module_dir, task, outcome).await;
                self.push_entry(module, task, Some(termination), failure).await;
                Ok(())
            }
            Err(e) => {
                let reason = e.reason();
                self.record_failure(module, task, reason, e.to_string(), None).await;
                self.push_entry(module, task, None, Some(reason)).await;
                if e.is_fatal() {
                    Err(e)
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Move the capture into place and classify the video
    async fn finalize(
        &self,
        module: &Module,
        module_dir: &Path,
        task: &mut VideoTask,
        outcome: RecordingOutcome,
    ) -> Option<FailureReason> {
        let partial = !outcome.is_complete();
        let finalized = self
            .finalizer
            .finalize(
                task,
                module_dir,
                module_dir,
                outcome.started_at,
                outcome.output_hint.as_deref(),
                partial,
            )
            .await;

        if partial {
            let error = match outcome.playback.termination {
                Termination::Timeout => RecordingError::PlaybackTimeout {
                    waited_secs: outcome.playback.elapsed.as_secs(),
                    last_position_secs: outcome.playback.last_position_secs.max(0.0) as u64,
                },
                _ => RecordingError::Playback(
                    outcome
                        .playback
                        .error
                        .clone()
                        .unwrap_or_else(|| "playback stopped with an error".to_string()),
                ),
            };
            let reason = error.reason();
            let mut message = error.to_string();

            let partial_file = match finalized {
                Ok(file) => {
                    warn!("⚠️  Kept partial recording {}", file.path.display());
                    Some(file.path)
                }
                Err(e) => {
                    message = format!("{}; {}", message, e);
                    None
                }
            };
            self.record_failure(module, task, reason, message, partial_file).await;
            return Some(reason);
        }

        match finalized {
            Ok(file) => {
                info!("✅ Recorded: {}", file.path.display());
                self.progress
                    .lock()
                    .await
                    .stats
                    .record_success(file.path, outcome.elapsed.as_secs(), file.size_bytes);
                None
            }
            Err(e) => {
                let reason = e.reason();
                self.record_failure(module, task, reason, e.to_string(), None).await;
                Some(reason)
            }
        }
    }

    async fn record_failure(
        &self,
        module: &Module,
        task: &VideoTask,
        reason: FailureReason,
        message: String,
        partial_file: Option<PathBuf>,
    ) {
        warn!("❌ Failed: {} #{:02} [{}] {}", module.name, task.index, reason, message);
        self.progress.lock().await.stats.record_failure(FailureRecord {
            module: module.name.clone(),
            index: task.index,
            url: task.url.clone(),
            reason,
            message,
            partial_file,
        });
    }

    async fn push_entry(
        &self,
        module: &Module,
        task: &VideoTask,
        termination: Option<Termination>,
        failure: Option<FailureReason>,
    ) {
        self.progress.lock().await.videos.push(VideoEntry {
            module: module.name.clone(),
            task: task.clone(),
            termination,
            failure,
        });
    }

    /// Report of the run so far
    pub async fn report(&self, interrupted: bool, aborted: Option<FailureReason>) -> RunReport {
        let progress = self.progress.lock().await;
        RunReport {
            started_at: progress.started_at.unwrap_or_else(Local::now),
            finished_at: Local::now(),
            trial: self.config.trial.enabled,
            interrupted,
            aborted,
            statistics: progress.stats.clone(),
            videos: progress.videos.clone(),
        }
    }

    /// Write the results file when one is configured
    pub async fn write_results(
        &self,
        interrupted: bool,
        aborted: Option<FailureReason>,
    ) -> RecordingResult<Option<PathBuf>> {
        let Some(file) = &self.config.output.results_file else {
            return Ok(None);
        };
        let path = self.config.output.base_dir.join(file);

        let report = self.report(interrupted, aborted).await;
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| RecordingError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, json).await?;

        info!("💾 Results saved to: {}", path.display());
        Ok(Some(path))
    }

    /// Cooperative cancellation cleanup: stop any running capture
    pub async fn emergency_stop(&self) {
        self.coordinator.emergency_stop().await;
        if let Err(e) = self.write_results(true, None).await {
            warn!("Could not write results file: {}", e);
        }
    }
}
