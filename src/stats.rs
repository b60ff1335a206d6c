use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::FailureReason;
use crate::finalizer::is_finalized_name;

/// A video that did not produce a complete recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub module: String,
    pub index: usize,
    pub url: String,
    pub reason: FailureReason,
    pub message: String,

    /// Recording kept with the partial suffix, if any
    pub partial_file: Option<PathBuf>,
}

/// Counters accumulated over a run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStatistics {
    pub processed: usize,
    pub failed: usize,
    pub total_duration_secs: u64,
    pub total_size_bytes: u64,
    pub files: Vec<PathBuf>,
    pub failures: Vec<FailureRecord>,
}

impl RunStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, path: PathBuf, duration_secs: u64, size_bytes: u64) {
        self.processed += 1;
        self.total_duration_secs += duration_secs;
        self.total_size_bytes += size_bytes;
        self.files.push(path);
    }

    pub fn record_failure(&mut self, failure: FailureRecord) {
        self.failed += 1;
        if let Some(partial) = &failure.partial_file {
            self.files.push(partial.clone());
        }
        self.failures.push(failure);
    }

    pub fn total(&self) -> usize {
        self.processed + self.failed
    }

    /// Failure count per reason code, in first-seen order
    pub fn failures_by_reason(&self) -> Vec<(FailureReason, usize)> {
        let mut counts: Vec<(FailureReason, usize)> = Vec::new();
        for failure in &self.failures {
            match counts.iter_mut().find(|(reason, _)| *reason == failure.reason) {
                Some((_, count)) => *count += 1,
                None => counts.push((failure.reason, 1)),
            }
        }
        counts
    }

    /// Human-readable end-of-run report.
    ///
    /// The size line uses the larger of the accumulated size and what is
    /// actually on disk under `base_dir`, so files from resumed runs count.
    pub fn summary(&self, base_dir: &Path) -> String {
        let on_disk = directory_video_size(base_dir);
        let total_size = self.total_size_bytes.max(on_disk);

        let mut out = String::new();
        let rule = "=".repeat(60);
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "📊 RECORDING SUMMARY");
        let _ = writeln!(out, "{}", rule);
        let _ = writeln!(out, "✅ Recorded: {}", self.processed);
        let _ = writeln!(out, "❌ Failed: {}", self.failed);
        let _ = writeln!(out, "⏱️  Recorded time: {}", format_duration(self.total_duration_secs));
        let _ = writeln!(out, "💾 Total size: {}", format_size(total_size));

        if !self.files.is_empty() {
            let _ = writeln!(out, "\n📁 Files:");
            for file in &self.files {
                let _ = writeln!(out, "   - {}", display_relative(file, base_dir));
            }
        }

        if !self.failures.is_empty() {
            let _ = writeln!(out, "\n⚠️  Failures:");
            for (reason, count) in self.failures_by_reason() {
                let _ = writeln!(out, "   {}: {}", reason, count);
            }
            for failure in &self.failures {
                let _ = writeln!(
                    out,
                    "   - [{}] {} #{:02}: {} ({})",
                    failure.reason, failure.module, failure.index, failure.message, failure.url
                );
            }
        }

        let _ = write!(out, "{}", rule);
        out
    }
}

/// `1h 02m 03s`, `4m 05s` or `42s`
pub fn format_duration(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Byte count with a binary unit
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = "B";
    for next in UNITS {
        if value < 1024.0 {
            break;
        }
        value /= 1024.0;
        unit = next;
    }
    format!("{:.2} {}", value, unit)
}

/// Size of every finalized recording under `dir`
pub fn directory_video_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| is_finalized_name(&entry.file_name().to_string_lossy()))
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

fn display_relative(path: &Path, base_dir: &Path) -> String {
    path.strip_prefix(base_dir).unwrap_or(path).display().to_string()
}
