//! File Finalizer: finds the file the recorder just wrote and gives it its
//! final name inside the module folder.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{FileConfig, TrialConfig};
use crate::error::{RecordingError, RecordingResult};
use crate::listing::VideoTask;

const FALLBACK_NAME: &str = "video";

/// Make a string safe to use as a file or folder name.
///
/// Runs of whitespace, `|` and `:` become one `_`, characters that are illegal
/// on common filesystems are dropped, repeated `_` collapse, and the result is
/// cut to `max_len` characters.
pub fn sanitize_file_name(name: &str, max_len: usize) -> String {
    let mut cleaned = match Regex::new(r"[\s|:]+") {
        Ok(re) => re.replace_all(name, "_").into_owned(),
        Err(_) => name.to_string(),
    };

    cleaned.retain(|c| !matches!(c, '\\' | '/' | '*' | '?' | '"' | '<' | '>' | '|') && !c.is_control());

    if let Ok(re) = Regex::new(r"_+") {
        cleaned = re.replace_all(&cleaned, "_").into_owned();
    }

    let truncated: String = cleaned
        .trim_matches(|c| c == '_' || c == '.')
        .chars()
        .take(max_len)
        .collect();
    let trimmed = truncated.trim_end_matches(|c| c == '_' || c == '.');

    if trimmed.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Whether a file name already carries the `<index>_` prefix of a finalized recording
pub fn is_finalized_name(name: &str) -> bool {
    let digits = name.chars().take_while(|c| c.is_ascii_digit()).count();
    digits >= 2 && name[digits..].starts_with('_')
}

/// A capture file moved to its final location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedFile {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub partial: bool,
}

#[derive(Debug, Clone)]
struct Candidate {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

pub struct FileFinalizer {
    config: FileConfig,
    trial: TrialConfig,

    /// Files this finalizer produced; never picked up again as a new capture
    finalized: Mutex<HashSet<PathBuf>>,
}

impl FileFinalizer {
    pub fn new(config: FileConfig, trial: TrialConfig) -> Self {
        Self {
            config,
            trial,
            finalized: Mutex::new(HashSet::new()),
        }
    }

    /// Final file name for a video: `<index:02>_<title><suffixes>.<ext>`
    pub fn target_name(&self, index: usize, title: &str, partial: bool, extension: &str) -> String {
        let mut suffix = String::new();
        if self.trial.enabled {
            suffix.push_str(&self.trial.file_suffix);
        }
        if partial {
            suffix.push_str(&self.config.partial_suffix);
        }

        let prefix = format!("{:02}_", index);
        let extension = extension.trim_start_matches('.').to_lowercase();
        let fixed = prefix.chars().count() + suffix.chars().count() + extension.chars().count() + 1;
        let budget = self.config.max_name_length.saturating_sub(fixed).max(1);

        format!("{}{}{}.{}", prefix, sanitize_file_name(title, budget), suffix, extension)
    }

    /// Locate the new capture in `capture_dir` and move it into `module_dir`.
    ///
    /// An existing file at the destination is replaced.
    pub async fn finalize(
        &self,
        task: &mut VideoTask,
        module_dir: &Path,
        capture_dir: &Path,
        started_at: SystemTime,
        hint: Option<&Path>,
        partial: bool,
    ) -> RecordingResult<FinalizedFile> {
        let source = self.find_capture(capture_dir, started_at, hint).await?;

        let extension = source
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("mp4")
            .to_string();
        let title = task.title.clone().unwrap_or_else(|| FALLBACK_NAME.to_string());
        let destination = module_dir.join(self.target_name(task.index, &title, partial, &extension));

        if destination != source && tokio::fs::try_exists(&destination).await.unwrap_or(false) {
            warn!("♻️  Overwriting existing file: {}", destination.display());
            tokio::fs::remove_file(&destination).await?;
        }

        move_file(&source, &destination).await?;

        let size_bytes = tokio::fs::metadata(&destination).await?.len();
        self.finalized.lock().await.insert(destination.clone());
        task.target_path = Some(destination.clone());
        task.size_bytes = Some(size_bytes);

        info!(
            "💾 Saved {} ({:.1} MB)",
            destination.display(),
            size_bytes as f64 / 1_048_576.0
        );

        Ok(FinalizedFile {
            path: destination,
            size_bytes,
            partial,
        })
    }

    /// Poll the capture folder with exponential backoff until a new file shows up
    async fn find_capture(
        &self,
        capture_dir: &Path,
        started_at: SystemTime,
        hint: Option<&Path>,
    ) -> RecordingResult<PathBuf> {
        tokio::time::sleep(Duration::from_millis(self.config.release_delay_ms)).await;

        let mut delay = Duration::from_millis(self.config.retry_initial_delay_ms);
        let max_delay = Duration::from_millis(self.config.retry_max_delay_ms);

        for attempt in 1..=self.config.retry_attempts {
            if let Some(path) = self.usable_hint(capture_dir, hint).await {
                debug!("Using recorder-reported output {}", path.display());
                return Ok(path);
            }

            match self.scan(capture_dir, started_at).await {
                Ok(mut candidates) if !candidates.is_empty() => {
                    candidates.sort_by(|a, b| b.modified.cmp(&a.modified).then(b.size.cmp(&a.size)));
                    let chosen = candidates.swap_remove(0);
                    debug!(
                        "Picked {} out of {} candidate(s)",
                        chosen.path.display(),
                        candidates.len() + 1
                    );
                    return Ok(chosen.path);
                }
                Ok(_) => debug!(
                    "Attempt {}/{}: no new recording in {}",
                    attempt,
                    self.config.retry_attempts,
                    capture_dir.display()
                ),
                Err(e) => warn!("Attempt {}/{}: cannot scan {}: {}", attempt, self.config.retry_attempts, capture_dir.display(), e),
            }

            if attempt < self.config.retry_attempts {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(max_delay);
            }
        }

        Err(RecordingError::FileNotFound {
            dir: capture_dir.to_path_buf(),
            attempts: self.config.retry_attempts,
        })
    }

    async fn usable_hint(&self, capture_dir: &Path, hint: Option<&Path>) -> Option<PathBuf> {
        let hint = hint?;
        if !tokio::fs::metadata(hint).await.ok()?.is_file() || !self.is_video(hint) {
            return None;
        }

        let parent = tokio::fs::canonicalize(hint.parent()?).await.ok()?;
        let dir = tokio::fs::canonicalize(capture_dir).await.ok()?;
        (parent == dir).then(|| hint.to_path_buf())
    }

    async fn scan(&self, capture_dir: &Path, started_at: SystemTime) -> std::io::Result<Vec<Candidate>> {
        let not_before = started_at
            .checked_sub(Duration::from_millis(self.config.timestamp_slack_ms))
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let finalized = self.finalized.lock().await.clone();
        let mut candidates = Vec::new();
        let mut entries = tokio::fs::read_dir(capture_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !self.is_video(&path) {
                continue;
            }

            if finalized.contains(&path) {
                continue;
            }

            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            let modified = metadata.modified()?;
            let created = metadata.created().unwrap_or(modified);
            if created < not_before {
                continue;
            }

            candidates.push(Candidate {
                path,
                modified,
                size: metadata.len(),
            });
        }

        Ok(candidates)
    }

    fn is_video(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.config.video_extensions.iter().any(|v| v.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }
}

/// Rename, falling back to copy and delete across filesystems
async fn move_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    if source == destination {
        return Ok(());
    }

    match tokio::fs::rename(source, destination).await {
        Ok(()) => Ok(()),
        Err(e) => {
            debug!("Rename failed ({}), copying instead", e);
            tokio::fs::copy(source, destination).await?;
            tokio::fs::remove_file(source).await
        }
    }
}
