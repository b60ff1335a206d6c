use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the course recorder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Recorder (OBS) control channel
    pub capture: CaptureConfig,

    /// Browser remote-debugging settings
    pub browser: BrowserConfig,

    /// Recording timing and playback monitoring
    pub recording: RecordingConfig,

    /// Finalization of captured files
    pub files: FileConfig,

    /// Trial mode limits
    pub trial: TrialConfig,

    /// Resume position
    pub resume: ResumeConfig,

    /// URL listing parsing
    pub listing: ListingConfig,

    /// Output locations
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// obs-websocket host
    pub host: String,

    /// obs-websocket port
    pub port: u16,

    /// obs-websocket password (None = authentication disabled)
    pub password: Option<String>,

    /// Timeout for a single request/response round-trip (seconds)
    pub request_timeout_secs: u64,

    /// How many times to check that a recording really started
    pub start_confirm_attempts: u32,

    /// Delay between start confirmation checks (milliseconds)
    pub start_confirm_interval_ms: u64,

    /// Pause after a stop request so the recorder can close its output (milliseconds)
    pub stop_settle_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Host of the remote-debugging endpoint
    pub host: String,

    /// Remote-debugging port the browser was started with
    pub debug_port: u16,

    /// Browser executable used when no instance is listening
    pub executable: Option<PathBuf>,

    /// Launch a browser when attaching fails
    pub launch_if_missing: bool,

    /// Domain the page must report after navigation
    pub expected_domain: String,

    /// Maximum wait for the page to finish loading (seconds)
    pub page_load_timeout_secs: u64,

    /// Extra wait after the page reports complete (milliseconds)
    pub settle_after_load_ms: u64,

    /// How long to keep probing for the media duration (seconds)
    pub duration_wait_secs: u64,

    /// Title used when the page exposes none
    pub default_title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Seconds recorded before playback starts
    pub leading_margin_secs: u64,

    /// Seconds recorded after playback completes
    pub trailing_margin_secs: u64,

    /// Duration assumed when the page does not report one (seconds)
    pub default_duration_secs: u64,

    /// Playback poll interval (milliseconds)
    pub poll_interval_ms: u64,

    /// Upper bound for a single browser query during monitoring (milliseconds)
    pub poll_timeout_ms: u64,

    /// Position tolerance for declaring playback complete (seconds)
    pub end_tolerance_secs: f64,

    /// Monitor ceiling as a multiple of the expected duration
    pub ceiling_multiplier: f64,

    /// Fixed headroom added to the scaled ceiling (seconds)
    pub ceiling_grace_secs: u64,

    /// Absolute monitor ceiling (seconds)
    pub max_wait_secs: u64,

    /// Consecutive failed polls treated as a dead tab
    pub max_poll_failures: u32,

    /// Put the player in fullscreen before monitoring
    pub fullscreen: bool,

    /// Pause between two videos (milliseconds)
    pub pause_between_videos_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// Attempts to find the new capture file
    pub retry_attempts: u32,

    /// First retry delay, doubled on each attempt (milliseconds)
    pub retry_initial_delay_ms: u64,

    /// Cap for the retry delay (milliseconds)
    pub retry_max_delay_ms: u64,

    /// Wait before the first scan so the recorder can release the file (milliseconds)
    pub release_delay_ms: u64,

    /// Allowed skew between recording start and file timestamps (milliseconds)
    pub timestamp_slack_ms: u64,

    /// Maximum length of a finalized file name, extension included
    pub max_name_length: usize,

    /// Extensions recognised as capture output
    pub video_extensions: Vec<String>,

    /// Suffix appended to recordings kept after a playback failure
    pub partial_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialConfig {
    /// Enable trial mode
    pub enabled: bool,

    /// Maximum modules processed in trial mode
    pub max_modules: Option<usize>,

    /// Maximum videos per module in trial mode
    pub max_videos_per_module: Option<usize>,

    /// Maximum recorded seconds per video in trial mode
    pub max_duration_secs: Option<u64>,

    /// Leading margin used in trial mode (seconds)
    pub leading_margin_secs: u64,

    /// Trailing margin used in trial mode (seconds)
    pub trailing_margin_secs: u64,

    /// Suffix appended to file names recorded in trial mode
    pub file_suffix: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeConfig {
    /// Module to start from (earlier modules are skipped)
    pub start_module: Option<String>,

    /// 1-based video to start from, applied to the first module
    pub start_video: Option<usize>,

    /// 1-based video to start from, per module name
    pub start_video_per_module: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Prefix that marks a module header line
    pub module_marker: String,

    /// Hosts accepted for video URLs (matched as suffixes)
    pub allowed_domains: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory that receives one folder per module
    pub base_dir: PathBuf,

    /// URL listing file
    pub url_file: PathBuf,

    /// Run results written as JSON (None = not written)
    pub results_file: Option<PathBuf>,

    /// Log level
    pub log_level: String,
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        // Try to load from various locations
        let config_paths = [
            "course-recorder.toml",
            "config/course-recorder.toml",
        ];

        for path in &config_paths {
            if let Ok(config_str) = std::fs::read_to_string(path) {
                match toml::from_str(&config_str) {
                    Ok(config) => {
                        tracing::info!("📄 Loaded configuration from: {}", path);
                        return Ok(config);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to parse config file {}: {}", path, e);
                    }
                }
            }
        }

        // Try environment variables
        if let Ok(config) = Self::from_env() {
            return Ok(config);
        }

        Err(anyhow!("No configuration file found"))
    }

    /// Load configuration from an explicit file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("Cannot read config file {}: {}", path.display(), e))?;
        let config = toml::from_str(&config_str)
            .map_err(|e| anyhow!("Invalid config file {}: {}", path.display(), e))?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        // Override with environment variables
        if let Ok(host) = std::env::var("COURSE_RECORDER_OBS_HOST") {
            config.capture.host = host;
        }

        if let Ok(port) = std::env::var("COURSE_RECORDER_OBS_PORT") {
            config.capture.port = port.parse().unwrap_or(4455);
        }

        if let Ok(password) = std::env::var("COURSE_RECORDER_OBS_PASSWORD") {
            config.capture.password = Some(password).filter(|p| !p.is_empty());
        }

        if let Ok(port) = std::env::var("COURSE_RECORDER_DEBUG_PORT") {
            config.browser.debug_port = port.parse().unwrap_or(9222);
        }

        if let Ok(output_dir) = std::env::var("COURSE_RECORDER_OUTPUT_DIR") {
            config.output.base_dir = PathBuf::from(output_dir);
        }

        if let Ok(url_file) = std::env::var("COURSE_RECORDER_URL_FILE") {
            config.output.url_file = PathBuf::from(url_file);
        }

        if let Ok(trial) = std::env::var("COURSE_RECORDER_TRIAL") {
            config.trial.enabled = matches!(trial.as_str(), "1" | "true" | "yes");
        }

        if let Ok(log_level) = std::env::var("COURSE_RECORDER_LOG_LEVEL") {
            config.output.log_level = log_level;
        }

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &str) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.capture.port == 0 {
            return Err(anyhow!("capture.port must be greater than 0"));
        }

        if self.browser.debug_port == 0 {
            return Err(anyhow!("browser.debug_port must be greater than 0"));
        }

        if self.recording.poll_interval_ms == 0 {
            return Err(anyhow!("recording.poll_interval_ms must be greater than 0"));
        }

        if self.recording.max_wait_secs == 0 {
            return Err(anyhow!("recording.max_wait_secs must be greater than 0"));
        }

        if !self.recording.ceiling_multiplier.is_finite() || self.recording.ceiling_multiplier < 1.0 {
            return Err(anyhow!("recording.ceiling_multiplier must be a finite number of at least 1.0"));
        }

        if !self.recording.end_tolerance_secs.is_finite() || self.recording.end_tolerance_secs < 0.0 {
            return Err(anyhow!("recording.end_tolerance_secs must be a finite, non-negative number"));
        }

        if self.files.retry_attempts == 0 {
            return Err(anyhow!("files.retry_attempts must be greater than 0"));
        }

        if self.files.max_name_length < 16 {
            return Err(anyhow!("files.max_name_length must be at least 16"));
        }

        if self.files.video_extensions.is_empty() {
            return Err(anyhow!("files.video_extensions must not be empty"));
        }

        if self.listing.module_marker.is_empty() {
            return Err(anyhow!("listing.module_marker must not be empty"));
        }

        if let Some(0) = self.resume.start_video {
            return Err(anyhow!("resume.start_video is 1-based"));
        }

        if self.browser.launch_if_missing && self.browser.executable.is_none() {
            return Err(anyhow!("browser.executable is required when launch_if_missing is set"));
        }

        tracing::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Leading margin for the current mode
    pub fn leading_margin(&self) -> Duration {
        if self.trial.enabled {
            Duration::from_secs(self.trial.leading_margin_secs)
        } else {
            Duration::from_secs(self.recording.leading_margin_secs)
        }
    }

    /// Trailing margin for the current mode
    pub fn trailing_margin(&self) -> Duration {
        if self.trial.enabled {
            Duration::from_secs(self.trial.trailing_margin_secs)
        } else {
            Duration::from_secs(self.recording.trailing_margin_secs)
        }
    }

    /// Cap a video duration to the trial limit when trial mode is on
    pub fn effective_duration(&self, duration_secs: u64) -> u64 {
        match (self.trial.enabled, self.trial.max_duration_secs) {
            (true, Some(limit)) => duration_secs.min(limit),
            _ => duration_secs,
        }
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Course Recorder Configuration:\n\
            - Recorder: {}:{} ({})\n\
            - Browser debug port: {}:{}\n\
            - URL file: {}\n\
            - Output Directory: {}\n\
            - Margins: {}s leading / {}s trailing\n\
            - Trial mode: {}",
            self.capture.host,
            self.capture.port,
            if self.capture.password.is_some() { "with password" } else { "no password" },
            self.browser.host,
            self.browser.debug_port,
            self.output.url_file.display(),
            self.output.base_dir.display(),
            self.leading_margin().as_secs(),
            self.trailing_margin().as_secs(),
            if self.trial.enabled { "enabled" } else { "disabled" },
        )
    }
}

impl CaptureConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// websocket URL of the recorder
    pub fn endpoint(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

impl BrowserConfig {
    /// HTTP URL of the remote-debugging endpoint
    pub fn endpoint(&self) -> String {
        format!("http://{}:{}", self.host, self.debug_port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            browser: BrowserConfig::default(),
            recording: RecordingConfig::default(),
            files: FileConfig::default(),
            trial: TrialConfig::default(),
            resume: ResumeConfig::default(),
            listing: ListingConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 4455,
            password: None,
            request_timeout_secs: 10,
            start_confirm_attempts: 10,
            start_confirm_interval_ms: 500,
            stop_settle_ms: 2000,
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            debug_port: 9222,
            executable: None,
            launch_if_missing: false,
            expected_domain: "youtube.com".to_string(),
            page_load_timeout_secs: 30,
            settle_after_load_ms: 5000,
            duration_wait_secs: 30,
            default_title: "untitled_video".to_string(),
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            leading_margin_secs: 4,
            trailing_margin_secs: 4,
            default_duration_secs: 60,
            poll_interval_ms: 2000,
            poll_timeout_ms: 5000,
            end_tolerance_secs: 1.0,
            ceiling_multiplier: 1.5,
            ceiling_grace_secs: 60,
            max_wait_secs: 4 * 3600, // 4 hours
            max_poll_failures: 5,
            fullscreen: true,
            pause_between_videos_ms: 2000,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 6,
            retry_initial_delay_ms: 500,
            retry_max_delay_ms: 4000,
            release_delay_ms: 2000,
            timestamp_slack_ms: 2000, // FAT timestamps are 2s granular
            max_name_length: 150,
            video_extensions: vec![
                "mp4".to_string(),
                "mkv".to_string(),
                "mov".to_string(),
                "avi".to_string(),
                "flv".to_string(),
                "webm".to_string(),
            ],
            partial_suffix: "_PARTIAL".to_string(),
        }
    }
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_modules: Some(1),
            max_videos_per_module: Some(2),
            max_duration_secs: Some(15),
            leading_margin_secs: 1,
            trailing_margin_secs: 1,
            file_suffix: "_TRIAL".to_string(),
        }
    }
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            module_marker: "#".to_string(),
            allowed_domains: vec!["youtube.com".to_string(), "youtu.be".to_string()],
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            url_file: PathBuf::from("urls.txt"),
            results_file: Some(PathBuf::from("recording_results.json")),
            log_level: "info".to_string(),
        }
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_output_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.base_dir = dir;
        self
    }

    pub fn with_url_file(mut self, path: PathBuf) -> Self {
        self.config.output.url_file = path;
        self
    }

    pub fn with_recorder(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.capture.host = host.into();
        self.config.capture.port = port;
        self
    }

    pub fn with_password(mut self, password: String) -> Self {
        self.config.capture.password = Some(password);
        self
    }

    pub fn with_debug_port(mut self, port: u16) -> Self {
        self.config.browser.debug_port = port;
        self
    }

    pub fn with_margins(mut self, leading_secs: u64, trailing_secs: u64) -> Self {
        self.config.recording.leading_margin_secs = leading_secs;
        self.config.recording.trailing_margin_secs = trailing_secs;
        self
    }

    pub fn with_trial(
        mut self,
        max_modules: Option<usize>,
        max_videos_per_module: Option<usize>,
        max_duration_secs: Option<u64>,
    ) -> Self {
        self.config.trial.enabled = true;
        self.config.trial.max_modules = max_modules;
        self.config.trial.max_videos_per_module = max_videos_per_module;
        self.config.trial.max_duration_secs = max_duration_secs;
        self
    }

    pub fn starting_at(mut self, module: Option<String>, video: Option<usize>) -> Self {
        self.config.resume.start_module = module;
        self.config.resume.start_video = video;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
