use async_trait::async_trait;
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::{Browser, BrowserConfig as LaunchConfig, Page};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{scripts, BrowserController, BrowserError, BrowserResult, PlaybackSnapshot};
use crate::config::BrowserConfig;

/// Answer of the `/json/version` endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointInfo {
    #[serde(rename = "Browser")]
    pub browser: String,

    #[serde(rename = "Protocol-Version", default)]
    pub protocol_version: String,

    #[serde(rename = "webSocketDebuggerUrl")]
    pub websocket_url: String,
}

/// Ask the remote-debugging endpoint which browser is listening
pub async fn check_endpoint(config: &BrowserConfig) -> BrowserResult<EndpointInfo> {
    let endpoint = config.endpoint();
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| BrowserError::Connect { endpoint: endpoint.clone(), reason: e.to_string() })?;

    let response = client
        .get(format!("{}/json/version", endpoint))
        .send()
        .await
        .map_err(|e| BrowserError::Connect { endpoint: endpoint.clone(), reason: e.to_string() })?;

    if !response.status().is_success() {
        return Err(BrowserError::Connect {
            endpoint,
            reason: format!("HTTP {}", response.status()),
        });
    }

    response
        .json::<EndpointInfo>()
        .await
        .map_err(|e| BrowserError::Connect { endpoint, reason: e.to_string() })
}

/// Browser driven over the Chrome DevTools Protocol
pub struct ChromiumBrowser {
    browser: Browser,
    page: Mutex<Option<Page>>,
    alive: Arc<AtomicBool>,
    handler: JoinHandle<()>,
    config: BrowserConfig,
}

impl ChromiumBrowser {
    /// Attach to a running browser, launching one when allowed
    pub async fn connect(config: &BrowserConfig) -> BrowserResult<Self> {
        let endpoint = config.endpoint();

        let (browser, mut handler) = match Self::attach(config).await {
            Ok(pair) => pair,
            Err(e) if config.launch_if_missing => {
                warn!("No browser listening at {} ({}), launching one", endpoint, e);
                Self::launch(config).await?
            }
            Err(e) => return Err(e),
        };

        let alive = Arc::new(AtomicBool::new(true));
        let handler_alive = Arc::clone(&alive);

        // Drive the protocol event loop
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
            handler_alive.store(false, Ordering::SeqCst);
        });

        info!("✅ Browser connected at {}", endpoint);
        Ok(Self {
            browser,
            page: Mutex::new(None),
            alive,
            handler,
            config: config.clone(),
        })
    }

    async fn attach(config: &BrowserConfig) -> BrowserResult<(Browser, chromiumoxide::Handler)> {
        let info = check_endpoint(config).await?;
        debug!("Attaching to {} via {}", info.browser, info.websocket_url);

        Browser::connect(info.websocket_url)
            .await
            .map_err(|e| BrowserError::Connect { endpoint: config.endpoint(), reason: e.to_string() })
    }

    async fn launch(config: &BrowserConfig) -> BrowserResult<(Browser, chromiumoxide::Handler)> {
        let executable = config
            .executable
            .as_ref()
            .ok_or_else(|| BrowserError::Launch("no executable configured".to_string()))?;

        let launch = LaunchConfig::builder()
            .with_head()
            .chrome_executable(executable)
            .port(config.debug_port)
            .arg("--autoplay-policy=no-user-gesture-required")
            .arg("--start-maximized")
            .build()
            .map_err(BrowserError::Launch)?;

        info!("🚀 Launching {}", executable.display());
        Browser::launch(launch)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn map_err(&self, context: &str, error: impl std::fmt::Display) -> BrowserError {
        if self.is_alive() {
            BrowserError::Script(format!("{}: {}", context, error))
        } else {
            BrowserError::Disconnected
        }
    }

    async fn current_page(&self) -> BrowserResult<Page> {
        if !self.is_alive() {
            return Err(BrowserError::Disconnected);
        }
        self.page.lock().await.clone().ok_or(BrowserError::NoPage)
    }

    /// Evaluate a script as if triggered by the user, returning its value
    async fn eval<T: DeserializeOwned>(&self, script: &str) -> BrowserResult<T> {
        let page = self.current_page().await?;
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .await_promise(true)
            .user_gesture(true)
            .build()
            .map_err(BrowserError::Script)?;

        let result = page
            .evaluate_expression(params)
            .await
            .map_err(|e| self.map_err("evaluate", e))?;
        result
            .into_value::<T>()
            .map_err(|e| BrowserError::Script(format!("unexpected script result: {}", e)))
    }
}

#[async_trait]
impl BrowserController for ChromiumBrowser {
    async fn open(&self, url: &str) -> BrowserResult<()> {
        self.close_tab().await?;

        let limit = Duration::from_secs(self.config.page_load_timeout_secs);
        let page = tokio::time::timeout(limit, self.browser.new_page(url))
            .await
            .map_err(|_| BrowserError::Timeout(format!("opening {}", url)))?
            .map_err(|e| self.map_err("new tab", e))?;

        if let Err(e) = page.bring_to_front().await {
            debug!("Could not focus the new tab: {}", e);
        }

        *self.page.lock().await = Some(page);
        Ok(())
    }

    async fn current_url(&self) -> BrowserResult<Option<String>> {
        let page = self.current_page().await?;
        page.url().await.map_err(|e| self.map_err("url", e))
    }

    async fn ready_state(&self) -> BrowserResult<String> {
        self.eval(scripts::READY_STATE).await
    }

    async fn video_title(&self) -> BrowserResult<Option<String>> {
        let title: String = self.eval(&scripts::video_title()).await?;
        Ok(Some(title).filter(|t| !t.is_empty()))
    }

    async fn duration_text(&self) -> BrowserResult<Option<String>> {
        let text: String = self.eval(scripts::DURATION_TEXT).await?;
        Ok(Some(text).filter(|t| !t.is_empty()))
    }

    async fn playback_state(&self) -> BrowserResult<PlaybackSnapshot> {
        let json: String = self.eval(&scripts::playback_state()).await?;
        serde_json::from_str(&json).map_err(|e| BrowserError::Script(format!("playback state: {}", e)))
    }

    async fn dismiss_overlays(&self) -> BrowserResult<u32> {
        self.eval(&scripts::dismiss_overlays()).await
    }

    async fn play(&self) -> BrowserResult<()> {
        let found: bool = self.eval(scripts::PLAY).await?;
        if !found {
            warn!("No media element to start");
        }
        Ok(())
    }

    async fn enter_fullscreen(&self) -> BrowserResult<()> {
        let entered: bool = self.eval(scripts::ENTER_FULLSCREEN).await?;
        if !entered {
            debug!("Fullscreen not available on this page");
        }
        Ok(())
    }

    async fn exit_fullscreen(&self) -> BrowserResult<()> {
        let _: bool = self.eval(scripts::EXIT_FULLSCREEN).await?;
        Ok(())
    }

    async fn close_tab(&self) -> BrowserResult<()> {
        let page = self.page.lock().await.take();
        if let Some(page) = page {
            if self.is_alive() {
                page.close().await.map_err(|e| self.map_err("close tab", e))?;
            }
        }
        Ok(())
    }
}

impl Drop for ChromiumBrowser {
    fn drop(&mut self) {
        self.handler.abort();
    }
}
