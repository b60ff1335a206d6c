use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use crate::error::{RecordingError, RecordingResult};

/// Lifecycle of one in-flight capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session created, recorder not asked yet
    Idle,

    /// Start request sent, waiting for the recorder to confirm
    Starting,

    /// Recorder confirmed it is writing
    Active,

    /// Stop request sent
    Stopping,

    /// Recorder confirmed the stop
    Stopped,

    /// Session aborted
    Failed,
}

impl SessionStatus {
    /// Whether `next` is a legal successor of this status
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Idle, Starting) => true,
            (Starting, Active) => true,
            (Active, Stopping) => true,
            (Stopping, Stopped) => true,
            // A failed start still has to be cleaned up
            (Starting, Stopping) => true,
            (Idle | Starting | Active | Stopping, Failed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Stopped | SessionStatus::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Starting => "starting",
            SessionStatus::Active => "active",
            SessionStatus::Stopping => "stopping",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Ephemeral state of one capture, owned by the coordinator for one video
#[derive(Debug)]
pub struct RecordingSession {
    pub id: Uuid,

    /// Wall-clock start, compared against capture file timestamps
    pub started_at: SystemTime,

    /// Monotonic start, used for elapsed time
    pub started: Instant,

    /// Expected stop time (duration + trailing margin)
    pub deadline: Option<Instant>,

    pub status: SessionStatus,

    /// Output path reported by the recorder on stop
    pub output_path: Option<PathBuf>,

    history: Vec<SessionStatus>,

    _permit: OwnedSemaphorePermit,
}

impl RecordingSession {
    pub fn status(&self) -> SessionStatus {
        self.status
    }

    /// Every status the session went through, in order
    pub fn history(&self) -> &[SessionStatus] {
        &self.history
    }

    /// Move to the next status, rejecting illegal transitions
    pub fn transition(&mut self, next: SessionStatus) -> RecordingResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(RecordingError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        debug!("🎬 Session {}: {} -> {}", self.id, self.status, next);
        self.status = next;
        self.history.push(next);
        Ok(())
    }

    /// Enter `Starting` and restart both clocks at the moment capture is requested
    pub fn begin_capture(&mut self) -> RecordingResult<()> {
        self.transition(SessionStatus::Starting)?;
        self.started_at = SystemTime::now();
        self.started = Instant::now();
        Ok(())
    }

    /// Mark the session failed unless it already ended
    pub fn fail(&mut self) {
        if !self.status.is_terminal() {
            debug!("🎬 Session {}: {} -> failed", self.id, self.status);
            self.status = SessionStatus::Failed;
            self.history.push(SessionStatus::Failed);
        }
    }

    /// Set the expected stop time from the expected recording length
    pub fn set_deadline(&mut self, expected: Duration) {
        self.deadline = Some(Instant::now() + expected);
    }

    /// How far past its expected stop time the session is, if at all
    pub fn overrun(&self) -> Option<Duration> {
        let deadline = self.deadline?;
        let now = Instant::now();
        (now > deadline).then(|| now - deadline)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Guarantees that at most one recording session exists at a time.
///
/// The recorder writes a single stream, so a session holds the only permit
/// for its whole lifetime and a second caller waits until it is dropped.
#[derive(Debug, Clone)]
pub struct SessionSlot {
    permit: Arc<Semaphore>,
}

impl SessionSlot {
    pub fn new() -> Self {
        Self {
            permit: Arc::new(Semaphore::new(1)),
        }
    }

    /// Wait for the slot and open a new idle session
    pub async fn open(&self) -> RecordingResult<RecordingSession> {
        let permit = Arc::clone(&self.permit)
            .acquire_owned()
            .await
            .map_err(|e| RecordingError::Capture(format!("session slot closed: {}", e)))?;
        Ok(Self::session(permit))
    }

    /// Open a session only if none is in flight
    pub fn try_open(&self) -> Option<RecordingSession> {
        Arc::clone(&self.permit)
            .try_acquire_owned()
            .ok()
            .map(Self::session)
    }

    /// Whether a session currently holds the slot
    pub fn is_busy(&self) -> bool {
        self.permit.available_permits() == 0
    }

    fn session(permit: OwnedSemaphorePermit) -> RecordingSession {
        RecordingSession {
            id: Uuid::new_v4(),
            started_at: SystemTime::now(),
            started: Instant::now(),
            deadline: None,
            status: SessionStatus::Idle,
            output_path: None,
            history: vec![SessionStatus::Idle],
            _permit: permit,
        }
    }
}

impl Default for SessionSlot {
    fn default() -> Self {
        Self::new()
    }
}
