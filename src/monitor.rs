//! Playback Monitor: a bounded polling loop over the browser's media state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, info, warn};

use crate::browser::BrowserController;
use crate::config::RecordingConfig;

/// Why monitoring stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Termination {
    /// Position reached the expected duration
    Completed,

    /// The media element reported `ended`
    Ended,

    /// The ceiling elapsed first
    Timeout,

    /// Media error or a tab that stopped answering
    Error,
}

impl Termination {
    /// Whether playback reached its end
    pub fn is_natural(&self) -> bool {
        matches!(self, Termination::Completed | Termination::Ended)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Termination::Completed => "completed",
            Termination::Ended => "ended",
            Termination::Timeout => "timeout",
            Termination::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackResult {
    pub termination: Termination,
    pub elapsed: Duration,
    pub last_position_secs: f64,
    pub overlays_dismissed: u32,
    pub polls: u32,

    /// Error detail when `termination` is `Error`
    pub error: Option<String>,
}

pub struct PlaybackMonitor {
    browser: Arc<dyn BrowserController>,
    config: RecordingConfig,
}

impl PlaybackMonitor {
    pub fn new(browser: Arc<dyn BrowserController>, config: RecordingConfig) -> Self {
        Self { browser, config }
    }

    /// Longest time `poll_until_done` waits for a video of `expected_secs`
    pub fn ceiling(&self, expected_secs: u64) -> Duration {
        let max_wait = Duration::from_secs(self.config.max_wait_secs);
        let scaled = expected_secs as f64 * self.config.ceiling_multiplier
            + self.config.ceiling_grace_secs as f64;
        Duration::try_from_secs_f64(scaled).unwrap_or(max_wait).min(max_wait)
    }

    /// Poll until playback completes, ends, fails, or the ceiling elapses.
    ///
    /// Never fails: every outcome is reported through [`Termination`]. Each
    /// browser call is bounded by the poll timeout and by the time left before
    /// the ceiling, so the call returns within the ceiling even when the tab
    /// hangs.
    pub async fn poll_until_done(&self, expected_secs: u64) -> PlaybackResult {
        let started = Instant::now();
        let ceiling = self.ceiling(expected_secs);
        let deadline = started + ceiling;
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let poll_timeout = Duration::from_millis(self.config.poll_timeout_ms);
        let target = (expected_secs as f64 - self.config.end_tolerance_secs).max(0.0);

        info!(
            "👀 Monitoring playback: expected {}s, ceiling {}s",
            expected_secs,
            ceiling.as_secs()
        );

        let mut result = PlaybackResult {
            termination: Termination::Timeout,
            elapsed: Duration::ZERO,
            last_position_secs: 0.0,
            overlays_dismissed: 0,
            polls: 0,
            error: None,
        };
        let mut consecutive_failures = 0u32;
        let mut last_progress_log = started;

        loop {
            if Instant::now() >= deadline {
                warn!("⏰ Playback ceiling of {}s reached", ceiling.as_secs());
                result.termination = Termination::Timeout;
                break;
            }

            result.polls += 1;
            let poll = match timeout(call_limit(poll_timeout, deadline), self.browser.playback_state()).await {
                Ok(Ok(snapshot)) if snapshot.has_media => Ok(snapshot),
                Ok(Ok(_)) => Err("no media element on the page".to_string()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("no answer within {}ms", poll_timeout.as_millis())),
            };

            match poll {
                Ok(snapshot) => {
                    consecutive_failures = 0;
                    result.last_position_secs = snapshot.position;
                    debug!(
                        "Poll {}: position {:.1}s, paused {}, ended {}",
                        result.polls, snapshot.position, snapshot.paused, snapshot.ended
                    );

                    if let Some(error) = snapshot.error {
                        warn!("❌ Media error: {}", error);
                        result.termination = Termination::Error;
                        result.error = Some(error);
                        break;
                    }

                    if snapshot.ended {
                        result.termination = Termination::Ended;
                        break;
                    }

                    if snapshot.position >= target {
                        result.termination = Termination::Completed;
                        break;
                    }

                    if snapshot.overlay_present && Instant::now() < deadline {
                        match timeout(call_limit(poll_timeout, deadline), self.browser.dismiss_overlays()).await {
                            Ok(Ok(closed)) if closed > 0 => {
                                info!("🧹 Dismissed {} overlay(s) during playback", closed);
                                result.overlays_dismissed += closed;
                            }
                            Ok(Ok(_)) => {}
                            Ok(Err(e)) => debug!("Overlay dismissal failed: {}", e),
                            Err(_) => debug!("Overlay dismissal timed out"),
                        }
                    }

                    if snapshot.paused && Instant::now() < deadline {
                        if let Ok(Err(e)) = timeout(call_limit(poll_timeout, deadline), self.browser.play()).await {
                            debug!("Resume failed: {}", e);
                        }
                    }

                    if last_progress_log.elapsed() >= Duration::from_secs(30) {
                        info!(
                            "⏱️  Playback at {:.0}s of {}s",
                            snapshot.position, expected_secs
                        );
                        last_progress_log = Instant::now();
                    }
                }
                Err(_) if Instant::now() >= deadline => {
                    debug!("Poll cut short by the ceiling");
                }
                Err(reason) => {
                    consecutive_failures += 1;
                    warn!(
                        "Playback poll failed ({}/{}): {}",
                        consecutive_failures, self.config.max_poll_failures, reason
                    );
                    if consecutive_failures >= self.config.max_poll_failures {
                        result.termination = Termination::Error;
                        result.error = Some(reason);
                        break;
                    }
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            sleep(poll_interval.min(remaining)).await;
        }

        result.elapsed = started.elapsed();
        info!(
            "🏁 Playback {} after {:.1}s ({} polls, last position {:.1}s)",
            result.termination,
            result.elapsed.as_secs_f64(),
            result.polls,
            result.last_position_secs
        );
        result
    }
}

/// Time a single browser call may take: the poll timeout, cut at the deadline
fn call_limit(poll_timeout: Duration, deadline: Instant) -> Duration {
    poll_timeout.min(deadline.saturating_duration_since(Instant::now()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserResult, PlaybackSnapshot};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Media element whose position advances by `step` on each poll
    struct Player {
        position: Mutex<f64>,
        step: f64,
        ended_at: Option<f64>,
        overlay_once: Mutex<bool>,
        hang: bool,
        paused: bool,
        controls_hang: bool,
        error: Option<String>,
    }

    impl Player {
        fn advancing(step: f64) -> Self {
            Self {
                position: Mutex::new(0.0),
                step,
                ended_at: None,
                overlay_once: Mutex::new(false),
                hang: false,
                paused: false,
                controls_hang: false,
                error: None,
            }
        }
    }

    #[async_trait]
    impl BrowserController for Player {
        async fn open(&self, _url: &str) -> BrowserResult<()> {
            Ok(())
        }
        async fn current_url(&self) -> BrowserResult<Option<String>> {
            Ok(None)
        }
        async fn ready_state(&self) -> BrowserResult<String> {
            Ok("complete".to_string())
        }
        async fn video_title(&self) -> BrowserResult<Option<String>> {
            Ok(None)
        }
        async fn duration_text(&self) -> BrowserResult<Option<String>> {
            Ok(None)
        }
        async fn playback_state(&self) -> BrowserResult<PlaybackSnapshot> {
            if self.hang {
                std::future::pending::<()>().await;
            }
            let mut position = self.position.lock().unwrap();
            *position += self.step;
            let overlay = std::mem::replace(&mut *self.overlay_once.lock().unwrap(), false);
            Ok(PlaybackSnapshot {
                position: *position,
                ended: self.ended_at.map(|end| *position >= end).unwrap_or(false),
                overlay_present: overlay || self.controls_hang,
                paused: self.paused,
                error: self.error.clone(),
                has_media: true,
                ..PlaybackSnapshot::default()
            })
        }
        async fn dismiss_overlays(&self) -> BrowserResult<u32> {
            if self.controls_hang {
                std::future::pending::<()>().await;
            }
            Ok(1)
        }
        async fn play(&self) -> BrowserResult<()> {
            if self.controls_hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
        async fn enter_fullscreen(&self) -> BrowserResult<()> {
            Ok(())
        }
        async fn exit_fullscreen(&self) -> BrowserResult<()> {
            Ok(())
        }
        async fn close_tab(&self) -> BrowserResult<()> {
            Ok(())
        }
    }

    fn monitor(player: Player) -> PlaybackMonitor {
        PlaybackMonitor::new(Arc::new(player), RecordingConfig::default())
    }

    #[test]
    fn test_ceiling_is_scaled_and_capped() {
        let monitor = monitor(Player::advancing(0.0));
        // 100 * 1.5 + 60
        assert_eq!(monitor.ceiling(100), Duration::from_secs(210));
        assert_eq!(monitor.ceiling(100_000), Duration::from_secs(4 * 3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_near_expected_position() {
        let monitor = monitor(Player::advancing(2.0));
        let result = monitor.poll_until_done(10).await;

        assert_eq!(result.termination, Termination::Completed);
        assert!(result.last_position_secs >= 9.0);
        assert!(result.termination.is_natural());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_flag_wins_before_expected_position() {
        let mut player = Player::advancing(2.0);
        player.ended_at = Some(6.0);
        let result = monitor(player).poll_until_done(600).await;

        assert_eq!(result.termination, Termination::Ended);
        assert_eq!(result.polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_playback_times_out_at_ceiling() {
        let monitor = monitor(Player::advancing(0.0));
        let started = Instant::now();
        let result = monitor.poll_until_done(20).await;

        assert_eq!(result.termination, Termination::Timeout);
        let ceiling = monitor.ceiling(20);
        assert!(started.elapsed() >= ceiling);
        assert!(started.elapsed() <= ceiling);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_controls_do_not_overrun_ceiling() {
        let mut player = Player::advancing(0.0);
        player.paused = true;
        player.controls_hang = true;
        let monitor = monitor(player);

        let started = Instant::now();
        let result = monitor.poll_until_done(20).await;

        assert_eq!(result.termination, Termination::Timeout);
        assert!(started.elapsed() <= monitor.ceiling(20));
    }

    #[test]
    fn test_ceiling_survives_extreme_multipliers() {
        let max_wait = Duration::from_secs(RecordingConfig::default().max_wait_secs);
        for multiplier in [1e300, f64::INFINITY, f64::NAN] {
            let config = RecordingConfig {
                ceiling_multiplier: multiplier,
                ..RecordingConfig::default()
            };
            let monitor = PlaybackMonitor::new(Arc::new(Player::advancing(0.0)), config);
            assert_eq!(monitor.ceiling(60), max_wait);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_tab_is_reported_as_error() {
        let mut player = Player::advancing(1.0);
        player.hang = true;
        let config = RecordingConfig::default();
        let monitor = PlaybackMonitor::new(Arc::new(player), config.clone());

        let started = Instant::now();
        let result = monitor.poll_until_done(3600).await;

        assert_eq!(result.termination, Termination::Error);
        assert_eq!(result.polls, config.max_poll_failures);
        assert!(started.elapsed() <= monitor.ceiling(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_media_error_stops_monitoring() {
        let mut player = Player::advancing(1.0);
        player.error = Some("media error 3".to_string());
        let result = monitor(player).poll_until_done(60).await;

        assert_eq!(result.termination, Termination::Error);
        assert_eq!(result.error.as_deref(), Some("media error 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlays_are_dismissed_without_resetting_progress() {
        let player = Player::advancing(2.0);
        *player.overlay_once.lock().unwrap() = true;
        let result = monitor(player).poll_until_done(10).await;

        assert_eq!(result.overlays_dismissed, 1);
        assert_eq!(result.termination, Termination::Completed);
    }
}
