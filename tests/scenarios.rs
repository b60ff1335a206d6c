//! End-to-end runs of the pipeline against in-memory browser and recorder fakes.

mod common;

use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::{Duration, Instant};

use common::{test_config, FakeBrowser, FakeCapture, Playback, LISTING};
use course_recorder::capture::CaptureController;
use course_recorder::config::Config;
use course_recorder::listing::{apply_trial_limits, ListingParser, Module, VideoTask};
use course_recorder::{FailureReason, RecordingCoordinator, RecordingError, RecordingPipeline};

fn plan(config: &Config) -> Vec<Module> {
    let modules = ListingParser::new(config.listing.clone()).parse_str(LISTING).unwrap();
    apply_trial_limits(modules, &config.trial)
}

fn video_files(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test(start_paused = true)]
async fn test_trial_run_records_one_video() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path());
    config.trial.enabled = true;
    config.trial.max_modules = Some(1);
    config.trial.max_videos_per_module = Some(1);
    config.trial.max_duration_secs = Some(15);

    let modules = plan(&config);
    assert_eq!(modules.len(), 1);
    assert_eq!(modules[0].videos.len(), 1);

    let browser = FakeBrowser::new(Playback::Advancing(5.0));
    let capture = FakeCapture::new();
    let pipeline = RecordingPipeline::new(browser.clone(), capture.clone(), config);

    let stats = pipeline.run(&modules).await.unwrap();

    assert_eq!(stats.processed, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(browser.opened(), vec!["https://www.youtube.com/watch?v=first".to_string()]);
    assert_eq!(
        video_files(&temp_dir.path().join("MOD01")),
        vec!["01_Lesson_1_Guard_Basics_TRIAL.mp4".to_string()]
    );
    assert!(!temp_dir.path().join("MOD02").exists());
    assert!(!capture.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_full_run_walks_modules_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let modules = plan(&config);

    let browser = FakeBrowser::new(Playback::Advancing(10.0));
    let capture = FakeCapture::new();
    let pipeline = RecordingPipeline::new(browser.clone(), capture.clone(), config);

    let stats = pipeline.run(&modules).await.unwrap();

    assert_eq!(stats.processed, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(
        browser.opened(),
        vec![
            "https://www.youtube.com/watch?v=first".to_string(),
            "https://www.youtube.com/watch?v=second".to_string(),
            "https://www.youtube.com/watch?v=third".to_string(),
        ]
    );
    assert_eq!(video_files(&temp_dir.path().join("MOD01")).len(), 2);
    assert_eq!(
        video_files(&temp_dir.path().join("MOD02")),
        vec!["01_Lesson_3_Guard_Basics.mp4".to_string()]
    );
    assert_eq!(capture.events(), vec!["start", "stop", "start", "stop", "start", "stop"]);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_playback_keeps_partial_file() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path());
    config.trial.enabled = true;
    config.trial.max_videos_per_module = Some(1);
    let modules = plan(&config);

    let browser = FakeBrowser::new(Playback::Stalled);
    let capture = FakeCapture::new();
    let pipeline = RecordingPipeline::new(browser, capture.clone(), config);

    let started = Instant::now();
    let stats = pipeline.run(&modules).await.unwrap();

    // 15s trial cap: ceiling is 15 * 1.5 + 60 seconds of playback plus setup
    assert!(started.elapsed() < Duration::from_secs(300));
    assert_eq!(stats.processed, 0);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.failures[0].reason, FailureReason::PlaybackTimeout);
    assert!(stats.failures[0].message.starts_with("Playback did not finish within"));

    let partial = stats.failures[0].partial_file.clone().unwrap();
    assert!(partial.exists());
    assert!(partial
        .file_name()
        .unwrap()
        .to_string_lossy()
        .ends_with("_TRIAL_PARTIAL.mp4"));
    assert!(!capture.is_active());
}

#[tokio::test(start_paused = true)]
async fn test_missing_capture_file_fails_once() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path());
    config.trial.enabled = true;
    let modules = plan(&config);
    assert_eq!(modules[0].videos.len(), 2);

    let browser = FakeBrowser::new(Playback::Advancing(5.0));
    let capture = FakeCapture::without_files();
    let pipeline = RecordingPipeline::new(browser, capture, config);

    let stats = pipeline.run(&modules).await.unwrap();

    assert_eq!(stats.processed, 0);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.total(), 2);
    assert!(stats
        .failures
        .iter()
        .all(|failure| failure.reason == FailureReason::FileNotFound));
}

#[tokio::test(start_paused = true)]
async fn test_second_run_overwrites_existing_file() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path());
    config.trial.enabled = true;
    config.trial.max_videos_per_module = Some(1);
    let modules = plan(&config);
    let module_dir = temp_dir.path().join("MOD01");

    for size in [1024, 4096] {
        let browser = FakeBrowser::new(Playback::Advancing(5.0));
        let capture = FakeCapture::with_file_size(size);
        let pipeline = RecordingPipeline::new(browser, capture, config.clone());
        let stats = pipeline.run(&modules).await.unwrap();
        assert_eq!(stats.processed, 1);
    }

    let files = video_files(&module_dir);
    assert_eq!(files.len(), 1);
    let size = std::fs::metadata(module_dir.join(&files[0])).unwrap().len();
    assert_eq!(size, 4096);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_sessions_never_overlap() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());

    let browser = FakeBrowser::new(Playback::Advancing(10.0));
    let capture = FakeCapture::new();
    let coordinator = Arc::new(RecordingCoordinator::new(browser, capture.clone(), config));

    let handles: Vec<_> = ["https://www.youtube.com/watch?v=a", "https://www.youtube.com/watch?v=b"]
        .into_iter()
        .enumerate()
        .map(|(i, url)| {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move {
                let mut task = VideoTask::new(url, i + 1);
                coordinator.process(&mut task).await
            })
        })
        .collect();

    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        assert!(outcome.is_complete());
    }

    assert_eq!(capture.events(), vec!["start", "stop", "start", "stop"]);
    assert_eq!(capture.overlaps(), 0);
    assert!(!coordinator.is_busy());
}

#[tokio::test(start_paused = true)]
async fn test_stale_recording_is_stopped_first() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());

    let browser = FakeBrowser::new(Playback::Advancing(10.0));
    let capture = FakeCapture::new();
    capture.leave_running();
    let coordinator = RecordingCoordinator::new(browser, capture.clone(), config);

    let mut task = VideoTask::new("https://www.youtube.com/watch?v=a", 1);
    coordinator.process(&mut task).await.unwrap();

    assert_eq!(capture.events(), vec!["stop", "start", "stop"]);
    assert_eq!(capture.overlaps(), 0);
    assert_eq!(task.title.as_deref(), Some("Lesson 1: Guard Basics"));
    assert_eq!(task.duration_secs, Some(20));
}

#[tokio::test(start_paused = true)]
async fn test_outcome_carries_recorder_output_path() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());

    let browser = FakeBrowser::new(Playback::Advancing(10.0));
    let capture = FakeCapture::new();
    capture.set_output_directory(temp_dir.path()).await.unwrap();
    let coordinator = RecordingCoordinator::new(browser, capture, config);

    let mut task = VideoTask::new("https://www.youtube.com/watch?v=a", 1);
    let outcome = coordinator.process(&mut task).await.unwrap();

    let output = outcome.output_hint.unwrap();
    assert_eq!(output.parent(), Some(temp_dir.path()));
    assert!(output.exists());
}

#[tokio::test(start_paused = true)]
async fn test_hanging_browser_fails_navigation_in_time() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let load_timeout = config.browser.page_load_timeout_secs;

    let browser = FakeBrowser::new(Playback::Hang);
    let capture = FakeCapture::new();
    let coordinator = RecordingCoordinator::new(browser, capture.clone(), config);

    let started = Instant::now();
    let mut task = VideoTask::new("https://www.youtube.com/watch?v=a", 1);
    let err = coordinator.process(&mut task).await.unwrap_err();

    assert!(matches!(err, RecordingError::Navigation(_)));
    assert!(!err.is_fatal());
    assert!(started.elapsed() < Duration::from_secs(load_timeout + 30));
    assert!(capture.events().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_recorder_disconnect_aborts_run() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path());
    config.output.results_file = Some("results.json".into());
    let modules = plan(&config);

    let browser = FakeBrowser::new(Playback::Advancing(10.0));
    let capture = FakeCapture::new();
    capture.disconnect();
    let pipeline = RecordingPipeline::new(browser.clone(), capture, config);

    let err = pipeline.run(&modules).await.unwrap_err();

    assert!(matches!(err, RecordingError::Connection(_)));
    assert!(browser.opened().is_empty());

    let report = std::fs::read_to_string(temp_dir.path().join("results.json")).unwrap();
    let report: serde_json::Value = serde_json::from_str(&report).unwrap();
    assert_eq!(report["interrupted"], false);
    assert_eq!(report["aborted"], "connection");
}

#[tokio::test(start_paused = true)]
async fn test_results_file_lists_every_video() {
    let temp_dir = TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path());
    config.output.results_file = Some("results.json".into());
    config.trial.enabled = true;
    let modules = plan(&config);

    let pipeline = RecordingPipeline::new(
        FakeBrowser::new(Playback::Advancing(5.0)),
        FakeCapture::new(),
        config,
    );
    pipeline.run(&modules).await.unwrap();

    let report = std::fs::read_to_string(temp_dir.path().join("results.json")).unwrap();
    let report: serde_json::Value = serde_json::from_str(&report).unwrap();

    assert_eq!(report["trial"], true);
    assert_eq!(report["interrupted"], false);
    assert!(report["aborted"].is_null());
    assert_eq!(report["statistics"]["processed"], 2);
    let videos = report["videos"].as_array().unwrap();
    assert_eq!(videos.len(), 2);
    assert_eq!(videos[0]["module"], "MOD01");
    assert_eq!(videos[0]["termination"], "completed");
    assert_eq!(videos[1]["index"], 2);
}
