//! URL listing parsing and the run plan derived from it.
//!
//! The listing is a plain text file where a line starting with the module
//! marker (`#` by default) opens a module and the following `http…` lines are
//! the videos of that module:
//!
//! ```text
//! # MOD01 Introduction
//! https://www.youtube.com/watch?v=aaa
//! https://www.youtube.com/watch?v=bbb
//!
//! # MOD02 Basics
//! https://youtu.be/ccc
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::config::{ListingConfig, ResumeConfig, TrialConfig};
use crate::finalizer::sanitize_file_name;

const MAX_MODULE_NAME_LENGTH: usize = 100;

#[derive(Error, Debug)]
pub enum ListingError {
    #[error("Cannot read URL listing {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No modules found in the URL listing")]
    NoModules,

    #[error("Cannot create module folder {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A named group of videos recorded into one folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    /// Folder-safe module name
    pub name: String,

    /// Videos in listing order
    pub videos: Vec<VideoTask>,
}

/// One video to record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoTask {
    pub url: String,

    /// 1-based position inside the module in the unfiltered listing
    pub index: usize,

    /// Title read from the page
    pub title: Option<String>,

    /// Duration read from the page, in seconds
    pub duration_secs: Option<u64>,

    /// Final location, set once the file was finalized
    pub target_path: Option<PathBuf>,

    /// Size of the finalized file
    pub size_bytes: Option<u64>,
}

impl VideoTask {
    pub fn new(url: impl Into<String>, index: usize) -> Self {
        Self {
            url: url.into(),
            index,
            title: None,
            duration_secs: None,
            target_path: None,
            size_bytes: None,
        }
    }
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            videos: Vec::new(),
        }
    }

    /// Folder that receives this module's recordings
    pub fn output_dir(&self, base_dir: &Path) -> PathBuf {
        base_dir.join(&self.name)
    }
}

/// Parses URL listings
pub struct ListingParser {
    config: ListingConfig,
}

impl ListingParser {
    pub fn new(config: ListingConfig) -> Self {
        Self { config }
    }

    /// Read and parse a listing file
    pub async fn parse_file(&self, path: &Path) -> Result<Vec<Module>, ListingError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ListingError::Read { path: path.to_path_buf(), source })?;

        info!("📄 Reading URL listing: {}", path.display());
        self.parse_str(&content)
    }

    /// Parse listing content
    pub fn parse_str(&self, content: &str) -> Result<Vec<Module>, ListingError> {
        let mut modules: Vec<Module> = Vec::new();
        let mut current: Option<usize> = None;
        let mut url_count = 0;

        for (line_number, raw_line) in content.lines().enumerate() {
            let line_number = line_number + 1;
            let line = raw_line.trim();

            if line.is_empty() {
                continue;
            }

            if let Some(header) = line.strip_prefix(self.config.module_marker.as_str()) {
                let raw_name = header.trim_start_matches(self.config.module_marker.as_str()).trim();
                if raw_name.is_empty() {
                    warn!("Line {}: module marker without a name, ignored", line_number);
                    continue;
                }
                let name = sanitize_file_name(raw_name, MAX_MODULE_NAME_LENGTH);

                if let Some(position) = modules.iter().position(|m| m.name == name) {
                    warn!("Line {}: module '{}' listed twice, its earlier URLs are replaced", line_number, name);
                    url_count -= modules[position].videos.len();
                    modules[position].videos.clear();
                    current = Some(position);
                } else {
                    info!("✓ Module found (line {}): '{}'", line_number, name);
                    modules.push(Module::new(name));
                    current = Some(modules.len() - 1);
                }
                continue;
            }

            let Some(module) = current.and_then(|position| modules.get_mut(position)) else {
                warn!("Line {} ignored, no module opened yet: {}", line_number, truncate(line, 50));
                continue;
            };

            if !line.starts_with("http") {
                warn!("Line {} ignored (not a URL): {}", line_number, truncate(line, 50));
                continue;
            }

            if !self.is_allowed(line) {
                warn!("Line {}: URL outside the allowed domains: {}", line_number, truncate(line, 50));
                continue;
            }

            let index = module.videos.len() + 1;
            module.videos.push(VideoTask::new(line, index));
            url_count += 1;
        }

        if modules.is_empty() {
            return Err(ListingError::NoModules);
        }

        let empty: Vec<&str> = modules
            .iter()
            .filter(|m| m.videos.is_empty())
            .map(|m| m.name.as_str())
            .collect();
        if !empty.is_empty() {
            warn!("Modules without URLs: {:?}", empty);
        }

        info!("📹 Listing parsed: {} module(s), {} URL(s)", modules.len(), url_count);
        Ok(modules)
    }

    /// Whether a URL belongs to one of the allowed domains
    pub fn is_allowed(&self, candidate: &str) -> bool {
        let Ok(url) = Url::parse(candidate) else {
            return false;
        };
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_lowercase();

        self.config.allowed_domains.is_empty()
            || self.config.allowed_domains.iter().any(|domain| {
                let domain = domain.to_lowercase();
                host == domain || host.ends_with(&format!(".{}", domain))
            })
    }
}

fn truncate(line: &str, max_chars: usize) -> String {
    line.chars().take(max_chars).collect()
}

/// Drop modules listed before the configured start module
pub fn apply_start_module(modules: Vec<Module>, resume: &ResumeConfig) -> Vec<Module> {
    let Some(start) = resume.start_module.as_deref() else {
        return modules;
    };

    let Some(position) = modules.iter().position(|m| m.name == start) else {
        warn!("Start module '{}' not found, processing every module", start);
        return modules;
    };

    if position > 0 {
        info!("Skipping {} module(s) before '{}'", position, start);
    }
    modules.into_iter().skip(position).collect()
}

/// Apply trial mode limits
pub fn apply_trial_limits(modules: Vec<Module>, trial: &TrialConfig) -> Vec<Module> {
    if !trial.enabled {
        return modules;
    }

    let total = modules.len();
    let mut limited: Vec<Module> = match trial.max_modules {
        Some(max) => modules.into_iter().take(max).collect(),
        None => modules,
    };

    if limited.len() < total {
        info!("Trial mode: processing {} of {} modules", limited.len(), total);
    }

    if let Some(max_videos) = trial.max_videos_per_module {
        for module in &mut limited {
            if module.videos.len() > max_videos {
                info!(
                    "Trial mode: limiting '{}' to {} of {} videos",
                    module.name,
                    max_videos,
                    module.videos.len()
                );
                module.videos.truncate(max_videos);
            }
        }
    }

    limited
}

/// Skip videos before the configured start index.
///
/// A per-module map wins; otherwise the global start video applies to the
/// first module only. Video indices are kept, so numbering continues.
pub fn apply_start_video(mut modules: Vec<Module>, resume: &ResumeConfig) -> Vec<Module> {
    let per_module: &HashMap<String, usize> = &resume.start_video_per_module;

    for (position, module) in modules.iter_mut().enumerate() {
        let start = if !per_module.is_empty() {
            per_module.get(&module.name).copied()
        } else if position == 0 {
            resume.start_video
        } else {
            None
        };

        let Some(start) = start.filter(|s| *s > 1) else {
            continue;
        };

        if start > module.videos.len() {
            warn!(
                "Start video {} is past the {} videos of '{}', processing all of them",
                start,
                module.videos.len(),
                module.name
            );
            continue;
        }

        module.videos.retain(|video| video.index >= start);
        info!("Resuming '{}' from video {} ({} left)", module.name, start, module.videos.len());
    }

    modules
}

/// Create one folder per non-empty module
pub async fn create_module_dirs(
    modules: &[Module],
    base_dir: &Path,
) -> Result<HashMap<String, PathBuf>, ListingError> {
    let mut created = HashMap::new();

    for module in modules.iter().filter(|m| !m.videos.is_empty()) {
        let dir = module.output_dir(base_dir);
        if dir.exists() {
            info!("Folder '{}' already exists, files will be overwritten", module.name);
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| ListingError::CreateDir { path: dir.clone(), source })?;
        created.insert(module.name.clone(), dir);
    }

    info!("📁 Module folders ready: {}", created.len());
    Ok(created)
}
