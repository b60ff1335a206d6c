use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use course_recorder::browser::{check_endpoint, BrowserController, ChromiumBrowser};
use course_recorder::capture::{CaptureController, ObsClient};
use course_recorder::config::Config;
use course_recorder::listing::{
    apply_start_module, apply_start_video, apply_trial_limits, create_module_dirs, ListingParser, Module,
};
use course_recorder::pipeline::RecordingPipeline;
use course_recorder::RecordingError;

const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Parser)]
#[command(name = "course-recorder")]
#[command(version, author = "TigreRoll")]
#[command(about = "Records web-hosted course videos through OBS and a Chromium browser")]
struct Cli {
    /// Configuration file (default: course-recorder.toml, then environment)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// URL listing file
    #[arg(short, long)]
    urls: Option<PathBuf>,

    /// Directory that receives one folder per module
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Trial mode: few modules, few videos, short recordings
    #[arg(long, conflicts_with = "full")]
    trial: bool,

    /// Disable trial mode even if the configuration enables it
    #[arg(long)]
    full: bool,

    /// Modules processed in trial mode
    #[arg(long)]
    max_modules: Option<usize>,

    /// Videos per module in trial mode
    #[arg(long)]
    max_videos: Option<usize>,

    /// Seconds recorded per video in trial mode
    #[arg(long)]
    max_duration: Option<u64>,

    /// Module to resume from
    #[arg(long)]
    start_module: Option<String>,

    /// 1-based video to resume from in the first module
    #[arg(long)]
    start_video: Option<usize>,

    #[arg(long)]
    obs_host: Option<String>,

    #[arg(long)]
    obs_port: Option<u16>,

    #[arg(long)]
    obs_password: Option<String>,

    /// Browser remote-debugging port
    #[arg(long)]
    debug_port: Option<u16>,

    /// Parse and filter the listing, print the plan, record nothing
    #[arg(long)]
    dry_run: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(urls) = &self.urls {
            config.output.url_file = urls.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output.base_dir = dir.clone();
        }
        if self.trial {
            config.trial.enabled = true;
        }
        if self.full {
            config.trial.enabled = false;
        }
        if let Some(max) = self.max_modules {
            config.trial.max_modules = Some(max);
        }
        if let Some(max) = self.max_videos {
            config.trial.max_videos_per_module = Some(max);
        }
        if let Some(max) = self.max_duration {
            config.trial.max_duration_secs = Some(max);
        }
        if let Some(module) = &self.start_module {
            config.resume.start_module = Some(module.clone());
        }
        if let Some(video) = self.start_video {
            config.resume.start_video = Some(video);
        }
        if let Some(host) = &self.obs_host {
            config.capture.host = host.clone();
        }
        if let Some(port) = self.obs_port {
            config.capture.port = port;
        }
        if let Some(password) = &self.obs_password {
            config.capture.password = Some(password.clone()).filter(|p| !p.is_empty());
        }
        if let Some(port) = self.debug_port {
            config.browser.debug_port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, load_error) = match &cli.config {
        Some(path) => (Config::from_file(path)?, None),
        None => match Config::load() {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        },
    };
    cli.apply(&mut config);

    // Initialize logging: RUST_LOG, then --verbose, then the configured level
    let default_filter = if cli.verbose {
        "course_recorder=debug,info".to_string()
    } else {
        format!("course_recorder={},warn", config.output.log_level)
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .init();

    if let Some(e) = load_error {
        warn!("Failed to load config, using defaults: {}", e);
    }
    config.validate()?;

    info!("🚀 Course Recorder starting...");
    info!("{}", config.summary());

    let modules = plan(&config).await?;
    if modules.iter().all(|m| m.videos.is_empty()) {
        warn!("Nothing to record after filtering");
        return Ok(());
    }
    print_plan(&modules, &config);

    if cli.dry_run {
        info!("🔎 Dry run, nothing recorded");
        return Ok(());
    }

    let capture = connect_recorder(&config).await?;
    let browser = connect_browser(&config).await?;

    create_module_dirs(&modules, &config.output.base_dir).await?;

    let base_dir = config.output.base_dir.clone();
    let pipeline = RecordingPipeline::new(browser, capture, config);

    let outcome = tokio::select! {
        result = pipeline.run(&modules) => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match &outcome {
        Some(Ok(stats)) => println!("{}", stats.summary(&base_dir)),
        Some(Err(e)) => {
            error!("Run aborted: {}", e);
            println!("{}", pipeline.statistics().await.summary(&base_dir));
        }
        None => {
            warn!("⚠️  Interrupted, stopping the recording");
            pipeline.emergency_stop().await;
            println!("{}", pipeline.statistics().await.summary(&base_dir));
        }
    }

    let code = exit_code(outcome.as_ref().map(|result| result.as_ref().map(|_| ())));
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

/// Process exit code once a run is over. Only an interrupt is non-zero:
/// a run that ended early still produced its summary.
fn exit_code(outcome: Option<Result<(), &RecordingError>>) -> i32 {
    match outcome {
        Some(_) => 0,
        None => INTERRUPTED_EXIT_CODE,
    }
}

/// Parse the listing and apply the resume and trial filters
async fn plan(config: &Config) -> Result<Vec<Module>> {
    let parser = ListingParser::new(config.listing.clone());
    let modules = parser
        .parse_file(&config.output.url_file)
        .await
        .with_context(|| format!("Cannot load URL listing {}", config.output.url_file.display()))?;

    let modules = apply_start_module(modules, &config.resume);
    let modules = apply_trial_limits(modules, &config.trial);
    Ok(apply_start_video(modules, &config.resume))
}

fn print_plan(modules: &[Module], config: &Config) {
    let total: usize = modules.iter().map(|m| m.videos.len()).sum();
    info!("📋 Plan: {} module(s), {} video(s)", modules.len(), total);
    for module in modules {
        info!("   📂 {} ({} video(s))", module.name, module.videos.len());
        for video in &module.videos {
            info!("      {:02}. {}", video.index, video.url);
        }
    }
    if config.trial.enabled {
        if let Some(limit) = config.trial.max_duration_secs {
            info!("🧪 Trial mode: at most {}s per video", limit);
        }
    }
}

async fn connect_recorder(config: &Config) -> Result<Arc<dyn CaptureController>> {
    let client = ObsClient::connect(&config.capture)
        .await
        .map_err(|e| anyhow!("Recorder unavailable at {}: {}", config.capture.endpoint(), e))?;

    let version = client.version().await?;
    info!("🎥 OBS {} (websocket {})", version.recorder, version.protocol);

    match client.scene_report().await {
        Ok((current, scenes)) => info!(
            "🎞️  Scene '{}' active ({} scene(s) available)",
            current.as_deref().unwrap_or("none"),
            scenes.len()
        ),
        Err(e) => warn!("Could not list scenes: {}", e),
    }

    match client.output_directory().await {
        Ok(dir) => info!("📁 Recorder output directory: {}", dir.display()),
        Err(e) => warn!("Could not read the recorder output directory: {}", e),
    }

    Ok(Arc::new(client))
}

async fn connect_browser(config: &Config) -> Result<Arc<dyn BrowserController>> {
    match check_endpoint(&config.browser).await {
        Ok(info) => info!("🌐 {} (protocol {})", info.browser, info.protocol_version),
        Err(e) if config.browser.launch_if_missing => info!("No browser running yet: {}", e),
        Err(e) => {
            error!(
                "Start the browser with --remote-debugging-port={} first",
                config.browser.debug_port
            );
            return Err(anyhow!("Browser unavailable: {}", e));
        }
    }

    let browser = ChromiumBrowser::connect(&config.browser)
        .await
        .map_err(|e| anyhow!("Browser unavailable: {}", e))?;
    Ok(Arc::new(browser))
}
