//! Recording Coordinator: drives one video from navigation to a stopped
//! capture.
//!
//! The browser decides when playback is over; the recorder is only started
//! and stopped. A capture that was started is always stopped again, whatever
//! happens in between.

use serde::Serialize;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::browser::{parse_duration_text, url_matches_domain, BrowserController, BrowserError};
use crate::capture::{CaptureController, CaptureError};
use crate::config::Config;
use crate::error::{RecordingError, RecordingResult};
use crate::listing::VideoTask;
use crate::monitor::{PlaybackMonitor, PlaybackResult};
use crate::state::{RecordingSession, SessionSlot, SessionStatus};

const PAGE_POLL_INTERVAL: Duration = Duration::from_millis(500);
const DURATION_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// What happened while recording one video
#[derive(Debug, Clone, Serialize)]
pub struct RecordingOutcome {
    pub session_id: Uuid,
    pub title: String,

    /// Duration the page reported, if any
    pub reported_duration_secs: Option<u64>,

    /// Duration the monitor waited for (fallback and trial cap applied)
    pub expected_secs: u64,

    /// Length of the capture
    pub elapsed: Duration,

    pub playback: PlaybackResult,

    /// Wall-clock time the capture was requested
    pub started_at: SystemTime,

    /// Output file reported by the recorder on stop
    pub output_hint: Option<PathBuf>,
}

impl RecordingOutcome {
    /// Whether playback reached its end before the capture stopped
    pub fn is_complete(&self) -> bool {
        self.playback.termination.is_natural()
    }
}

pub struct RecordingCoordinator {
    browser: Arc<dyn BrowserController>,
    capture: Arc<dyn CaptureController>,
    monitor: PlaybackMonitor,
    slot: SessionSlot,
    config: Config,
}

impl RecordingCoordinator {
    pub fn new(
        browser: Arc<dyn BrowserController>,
        capture: Arc<dyn CaptureController>,
        config: Config,
    ) -> Self {
        let monitor = PlaybackMonitor::new(Arc::clone(&browser), config.recording.clone());
        Self {
            browser,
            capture,
            monitor,
            slot: SessionSlot::new(),
            config,
        }
    }

    /// Whether a session is currently in flight
    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    /// Record one video. Concurrent callers wait for the session slot.
    pub async fn process(&self, task: &mut VideoTask) -> RecordingResult<RecordingOutcome> {
        let mut session = self.slot.open().await?;
        info!("🎬 Recording video {:02}: {}", task.index, task.url);

        let result = self.run_session(&mut session, task).await;
        if let Err(e) = &result {
            warn!("❌ Session {} failed: {}", session.id, e);
            session.fail();
        }

        if let Err(e) = self.bounded_browser("exit fullscreen", self.browser.exit_fullscreen()).await {
            debug!("Exit fullscreen skipped: {}", e);
        }
        if let Err(e) = self.bounded_browser("close tab", self.browser.close_tab()).await {
            debug!("Closing the tab failed: {}", e);
        }

        result
    }

    async fn run_session(
        &self,
        session: &mut RecordingSession,
        task: &mut VideoTask,
    ) -> RecordingResult<RecordingOutcome> {
        self.recover_stale_capture().await?;

        self.navigate(&task.url).await?;
        self.dismiss_overlays("after load").await;

        let title = self.read_title().await;
        let reported = self.wait_for_duration().await;
        let expected = self
            .config
            .effective_duration(reported.unwrap_or(self.config.recording.default_duration_secs));
        info!(
            "📺 '{}' ({}), recording {}s",
            title,
            reported.map(|d| format!("{}s", d)).unwrap_or_else(|| "duration unknown".to_string()),
            expected
        );
        task.title = Some(title.clone());
        task.duration_secs = reported;

        if let Err(e) = self.start_capture(session).await {
            self.abort_capture(session).await;
            return Err(e);
        }

        let playback = self.record(session, expected).await;
        self.stop_capture(session).await?;

        Ok(RecordingOutcome {
            session_id: session.id,
            title,
            reported_duration_secs: reported,
            expected_secs: expected,
            elapsed: session.elapsed(),
            playback,
            started_at: session.started_at,
            output_hint: session.output_path.clone(),
        })
    }

    /// Stop a recording left running by an earlier session
    async fn recover_stale_capture(&self) -> RecordingResult<()> {
        match self.bounded_capture("record status", self.capture.is_recording()).await {
            Ok(false) => Ok(()),
            Ok(true) => {
                warn!("⚠️  Recorder is still recording from an earlier session, stopping it");
                match self.bounded_capture("stop stale recording", self.capture.stop_recording()).await {
                    Err(e) if e.is_disconnect() => {
                        return Err(RecordingError::from_capture("stop stale recording", e))
                    }
                    Err(e) => warn!("Stale recording stop failed: {}", e),
                    Ok(_) => {}
                }
                sleep(self.stop_settle()).await;
                Ok(())
            }
            Err(e) if e.is_disconnect() => Err(RecordingError::from_capture("record status", e)),
            Err(e) => {
                warn!("Could not check for a stale recording: {}", e);
                Ok(())
            }
        }
    }

    /// Open the URL and wait until the page is loaded on the expected domain
    async fn navigate(&self, url: &str) -> RecordingResult<()> {
        let load_timeout = Duration::from_secs(self.config.browser.page_load_timeout_secs);
        let deadline = Instant::now() + load_timeout;

        match timeout(load_timeout, self.browser.open(url)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(RecordingError::from_browser("open", e)),
            Err(_) => {
                return Err(RecordingError::Navigation(format!(
                    "{} did not open within {}s",
                    url,
                    load_timeout.as_secs()
                )))
            }
        }

        let domain = &self.config.browser.expected_domain;
        let mut last_state = String::new();
        let mut last_url = None;

        loop {
            match self.bounded_browser("ready state", self.browser.ready_state()).await {
                Ok(state) => last_state = state,
                Err(e) if e.is_disconnect() => return Err(RecordingError::from_browser("ready state", e)),
                Err(e) => debug!("Ready state not available yet: {}", e),
            }
            match self.bounded_browser("current url", self.browser.current_url()).await {
                Ok(current) => last_url = current,
                Err(e) if e.is_disconnect() => return Err(RecordingError::from_browser("current url", e)),
                Err(e) => debug!("Current URL not available yet: {}", e),
            }

            let on_domain = last_url
                .as_deref()
                .map(|current| url_matches_domain(current, domain))
                .unwrap_or(false);
            if last_state == "complete" && on_domain {
                break;
            }

            if Instant::now() >= deadline {
                return Err(RecordingError::Navigation(format!(
                    "page not ready after {}s (state '{}', url {})",
                    load_timeout.as_secs(),
                    last_state,
                    last_url.as_deref().unwrap_or("unknown")
                )));
            }
            sleep(PAGE_POLL_INTERVAL).await;
        }

        debug!("Page loaded, settling");
        sleep(Duration::from_millis(self.config.browser.settle_after_load_ms)).await;
        Ok(())
    }

    async fn dismiss_overlays(&self, context: &str) {
        match self.bounded_browser("dismiss overlays", self.browser.dismiss_overlays()).await {
            Ok(0) => {}
            Ok(closed) => info!("🧹 Dismissed {} overlay(s) {}", closed, context),
            Err(e) => debug!("Overlay dismissal {} failed: {}", context, e),
        }
    }

    async fn read_title(&self) -> String {
        match self.bounded_browser("title", self.browser.video_title()).await {
            Ok(Some(title)) if !title.trim().is_empty() => title.trim().to_string(),
            Ok(_) => {
                warn!("No title found, using '{}'", self.config.browser.default_title);
                self.config.browser.default_title.clone()
            }
            Err(e) => {
                warn!("Reading the title failed ({}), using '{}'", e, self.config.browser.default_title);
                self.config.browser.default_title.clone()
            }
        }
    }

    /// Player duration text first, then the media element
    async fn wait_for_duration(&self) -> Option<u64> {
        let deadline = Instant::now() + Duration::from_secs(self.config.browser.duration_wait_secs);

        loop {
            if let Ok(Some(text)) = self.bounded_browser("duration text", self.browser.duration_text()).await {
                if let Some(seconds) = parse_duration_text(&text) {
                    return Some(seconds);
                }
            }

            if let Ok(snapshot) = self.bounded_browser("playback state", self.browser.playback_state()).await {
                if let Some(duration) = snapshot.duration.filter(|d| d.is_finite() && *d > 0.0) {
                    return Some(duration.round() as u64);
                }
            }

            if Instant::now() >= deadline {
                warn!(
                    "Duration unknown after {}s, assuming {}s",
                    self.config.browser.duration_wait_secs, self.config.recording.default_duration_secs
                );
                return None;
            }
            sleep(DURATION_RETRY_INTERVAL).await;
        }
    }

    /// Request a capture and wait until the recorder confirms it is writing
    async fn start_capture(&self, session: &mut RecordingSession) -> RecordingResult<()> {
        session.begin_capture()?;
        self.bounded_capture("start recording", self.capture.start_recording())
            .await
            .map_err(|e| RecordingError::from_capture("start recording", e))?;

        let attempts = self.config.capture.start_confirm_attempts;
        let interval = Duration::from_millis(self.config.capture.start_confirm_interval_ms);

        for attempt in 1..=attempts {
            sleep(interval).await;
            match self.bounded_capture("record status", self.capture.is_recording()).await {
                Ok(true) => {
                    session.transition(SessionStatus::Active)?;
                    info!("🔴 Recording started");
                    return Ok(());
                }
                Ok(false) => debug!("Recording not active yet ({}/{})", attempt, attempts),
                Err(e) if e.is_disconnect() => return Err(RecordingError::from_capture("record status", e)),
                Err(e) => debug!("Record status failed ({}/{}): {}", attempt, attempts, e),
            }
        }

        Err(RecordingError::Capture(format!(
            "recorder did not confirm the start within {}ms",
            attempts as u64 * interval.as_millis() as u64
        )))
    }

    /// Margins, playback and monitoring. Browser hiccups only get logged.
    async fn record(&self, session: &mut RecordingSession, expected_secs: u64) -> PlaybackResult {
        let leading = self.config.leading_margin();
        let trailing = self.config.trailing_margin();

        debug!("Leading margin {}s", leading.as_secs());
        sleep(leading).await;

        if let Err(e) = self.bounded_browser("play", self.browser.play()).await {
            warn!("Starting playback failed: {}", e);
        }
        self.dismiss_overlays("at playback start").await;
        if self.config.recording.fullscreen {
            if let Err(e) = self.bounded_browser("fullscreen", self.browser.enter_fullscreen()).await {
                debug!("Fullscreen failed: {}", e);
            }
        }

        session.set_deadline(Duration::from_secs(expected_secs) + trailing);
        let playback = self.monitor.poll_until_done(expected_secs).await;
        if let Some(overrun) = session.overrun() {
            warn!(
                "⏰ Playback ran {:.0}s past the expected stop time",
                overrun.as_secs_f64()
            );
        }

        if playback.termination.is_natural() {
            debug!("Trailing margin {}s", trailing.as_secs());
            sleep(trailing).await;
        }
        playback
    }

    /// Stop the capture and make sure the recorder really stopped
    async fn stop_capture(&self, session: &mut RecordingSession) -> RecordingResult<()> {
        session.transition(SessionStatus::Stopping)?;

        let hint = match self.bounded_capture("stop recording", self.capture.stop_recording()).await {
            Ok(hint) => hint,
            Err(e) if e.is_disconnect() => return Err(RecordingError::from_capture("stop recording", e)),
            Err(e) => {
                warn!("Stop request failed: {}", e);
                None
            }
        };
        sleep(self.stop_settle()).await;

        let still_active = self
            .bounded_capture("record status", self.capture.is_recording())
            .await
            .map_err(|e| RecordingError::from_capture("record status", e))?;

        if still_active {
            warn!("⚠️  Recorder still active after stop, stopping again");
            if let Err(e) = self.bounded_capture("stop recording", self.capture.stop_recording()).await {
                warn!("Second stop request failed: {}", e);
            }
            sleep(self.stop_settle()).await;

            let active = self
                .bounded_capture("record status", self.capture.is_recording())
                .await
                .map_err(|e| RecordingError::from_capture("record status", e))?;
            if active {
                return Err(RecordingError::Capture("recorder did not stop".to_string()));
            }
        }

        session.output_path = hint;
        session.transition(SessionStatus::Stopped)?;
        info!("⏹️  Recording stopped after {:.1}s", session.elapsed().as_secs_f64());
        Ok(())
    }

    /// Best-effort stop after a failed start
    async fn abort_capture(&self, session: &mut RecordingSession) {
        if session.status() == SessionStatus::Starting {
            let _ = session.transition(SessionStatus::Stopping);
        }
        if let Err(e) = self.bounded_capture("stop recording", self.capture.stop_recording()).await {
            debug!("Abort stop: {}", e);
        }
    }

    /// Stop any running capture, swallowing errors. Used on interrupt.
    pub async fn emergency_stop(&self) {
        warn!("🛑 Emergency stop");
        match self.bounded_capture("record status", self.capture.is_recording()).await {
            Ok(true) => match self.bounded_capture("stop recording", self.capture.stop_recording()).await {
                Ok(_) => info!("⏹️  Recording stopped"),
                Err(e) => warn!("Emergency stop failed: {}", e),
            },
            Ok(false) => debug!("No recording in progress"),
            Err(e) => warn!("Cannot query the recorder: {}", e),
        }
        if let Err(e) = self.bounded_browser("close tab", self.browser.close_tab()).await {
            debug!("Closing the tab failed: {}", e);
        }
    }

    fn stop_settle(&self) -> Duration {
        Duration::from_millis(self.config.capture.stop_settle_ms)
    }

    fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.config.recording.poll_timeout_ms)
    }

    async fn bounded_browser<T>(
        &self,
        what: &str,
        call: impl Future<Output = Result<T, BrowserError>>,
    ) -> Result<T, BrowserError> {
        timeout(self.call_timeout(), call)
            .await
            .map_err(|_| BrowserError::Timeout(what.to_string()))?
    }

    async fn bounded_capture<T>(
        &self,
        what: &str,
        call: impl Future<Output = Result<T, CaptureError>>,
    ) -> Result<T, CaptureError> {
        timeout(self.config.capture.request_timeout(), call)
            .await
            .map_err(|_| CaptureError::Timeout(what.to_string()))?
    }
}
