/// Browser Controller: the remote-debugging browser that plays the videos
///
/// The browser's playback signal is the only ground truth for when a
/// recording may stop.

pub mod chromium;
pub mod scripts;

pub use chromium::{check_endpoint, ChromiumBrowser};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("Cannot connect to browser at {endpoint}: {reason}")]
    Connect { endpoint: String, reason: String },

    #[error("Cannot launch browser: {0}")]
    Launch(String),

    #[error("Browser connection closed")]
    Disconnected,

    #[error("No tab is open")]
    NoPage,

    #[error("{0} timed out")]
    Timeout(String),

    #[error("Script failed: {0}")]
    Script(String),
}

impl BrowserError {
    /// Whether the debugging channel itself is gone
    pub fn is_disconnect(&self) -> bool {
        matches!(self, BrowserError::Connect { .. } | BrowserError::Disconnected)
    }
}

pub type BrowserResult<T> = Result<T, BrowserError>;

/// One reading of the page's media element
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlaybackSnapshot {
    /// Current position in seconds
    pub position: f64,

    /// Media duration in seconds, when known
    pub duration: Option<f64>,

    pub paused: bool,

    pub ended: bool,

    /// HTMLMediaElement.readyState (0-4)
    pub ready_state: u8,

    /// A dismissable popup or ad overlay is visible
    pub overlay_present: bool,

    /// Media error reported by the element
    pub error: Option<String>,

    /// The page has a media element at all
    pub has_media: bool,
}

/// Operations consumed from the browser
#[async_trait]
pub trait BrowserController: Send + Sync {
    /// Open the URL in a fresh tab, replacing the previous one
    async fn open(&self, url: &str) -> BrowserResult<()>;

    async fn current_url(&self) -> BrowserResult<Option<String>>;

    /// `document.readyState`
    async fn ready_state(&self) -> BrowserResult<String>;

    async fn video_title(&self) -> BrowserResult<Option<String>>;

    /// Duration as shown by the player controls, e.g. `12:34`
    async fn duration_text(&self) -> BrowserResult<Option<String>>;

    async fn playback_state(&self) -> BrowserResult<PlaybackSnapshot>;

    /// Click away popups and ads, returning how many were closed
    async fn dismiss_overlays(&self) -> BrowserResult<u32>;

    async fn play(&self) -> BrowserResult<()>;

    async fn enter_fullscreen(&self) -> BrowserResult<()>;

    async fn exit_fullscreen(&self) -> BrowserResult<()>;

    async fn close_tab(&self) -> BrowserResult<()>;
}

/// Parse player duration text (`H:MM:SS`, `MM:SS` or `SS`) into seconds
pub fn parse_duration_text(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let parts: Vec<u64> = text
        .split(':')
        .map(|part| part.trim().parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;

    let seconds = match parts.as_slice() {
        [s] => *s,
        [m, s] => m * 60 + s,
        [h, m, s] => h * 3600 + m * 60 + s,
        _ => return None,
    };

    (seconds > 0).then_some(seconds)
}

/// Whether a page URL belongs to the expected domain
pub fn url_matches_domain(page_url: &str, domain: &str) -> bool {
    match url::Url::parse(page_url) {
        Ok(url) => url
            .host_str()
            .map(|host| host.to_lowercase().contains(&domain.to_lowercase()))
            .unwrap_or(false),
        Err(_) => false,
    }
}
