//! Chromium-based renderer using chromiumoxide.
//!
//! The browser process is launched on the first render and reused. A single
//! session cannot serve concurrent navigations, so renders are serialized on
//! the session mutex. Each render opens its own tab and closes it on every
//! exit path.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use url::Url;

use super::{PageRenderer, RenderError, RenderResult};

const READY_STATE_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ChromiumConfig {
    /// Browser binary; chromiumoxide's own lookup is used when unset.
    pub executable: Option<PathBuf>,
    pub headless: bool,
    /// Passed as `--proxy-server`. Chromium ignores credentials here.
    pub proxy: Option<String>,
    pub user_agent: Option<String>,
    /// Extra wait after `document.readyState` reaches `complete`, for late
    /// XHR-driven content.
    pub settle_delay: Duration,
    pub extra_args: Vec<String>,
}

impl Default for ChromiumConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: true,
            proxy: None,
            user_agent: None,
            settle_delay: Duration::from_millis(500),
            extra_args: Vec::new(),
        }
    }
}

struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

impl BrowserSession {
    fn is_alive(&self) -> bool {
        !self.handler.is_finished()
    }
}

pub struct ChromiumRenderer {
    config: ChromiumConfig,
    session: Mutex<Option<BrowserSession>>,
}

impl ChromiumRenderer {
    pub fn new(config: ChromiumConfig) -> Self {
        Self {
            config,
            session: Mutex::new(None),
        }
    }

    /// Whether a browser process is currently running.
    pub async fn is_running(&self) -> bool {
        self.session
            .lock()
            .await
            .as_ref()
            .is_some_and(BrowserSession::is_alive)
    }

    async fn launch(&self) -> RenderResult<BrowserSession> {
        log::info!("launching chromium (headless={})", self.config.headless);

        let mut builder = BrowserConfig::builder();
        if let Some(ref path) = self.config.executable {
            builder = builder.chrome_executable(path);
        }
        if !self.config.headless {
            builder = builder.with_head();
        }
        if let Some(ref proxy) = self.config.proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .arg("--no-default-browser-check");
        for arg in &self.config.extra_args {
            builder = builder.arg(arg.clone());
        }

        let config = builder.build().map_err(RenderError::Launch)?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| RenderError::Launch(err.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    log::debug!("chromium handler event error: {err}");
                }
            }
        });

        Ok(BrowserSession { browser, handler })
    }

    async fn navigate(&self, page: &Page, url: &Url) -> RenderResult<String> {
        if let Some(ref user_agent) = self.config.user_agent {
            page.execute(SetUserAgentOverrideParams::new(user_agent.clone()))
                .await
                .map_err(|err| RenderError::Navigation(err.to_string()))?;
        }

        page.goto(url.as_str())
            .await
            .map_err(|err| RenderError::Navigation(err.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|err| RenderError::Navigation(err.to_string()))?;

        wait_for_ready_state(page).await;
        if !self.config.settle_delay.is_zero() {
            tokio::time::sleep(self.config.settle_delay).await;
        }

        page.content()
            .await
            .map_err(|err| RenderError::Content(err.to_string()))
    }
}

impl Default for ChromiumRenderer {
    fn default() -> Self {
        Self::new(ChromiumConfig::default())
    }
}

#[async_trait]
impl PageRenderer for ChromiumRenderer {
    async fn render(&self, url: &Url, max_wait: Duration) -> RenderResult<String> {
        let mut guard = self.session.lock().await;

        if guard.as_ref().is_some_and(|session| !session.is_alive()) {
            log::warn!("chromium session ended unexpectedly; relaunching");
            *guard = None;
        }
        if guard.is_none() {
            *guard = Some(self.launch().await?);
        }
        let session = guard.as_ref().ok_or(RenderError::Unavailable)?;

        let started = Instant::now();
        let page = session
            .browser
            .new_page("about:blank")
            .await
            .map_err(|err| RenderError::Navigation(err.to_string()))?;

        let result = tokio::time::timeout(max_wait, self.navigate(&page, url)).await;

        if let Err(err) = page.close().await {
            log::debug!("failed to close tab for {url}: {err}");
        }

        let html = result.map_err(|_| RenderError::Timeout(max_wait))??;
        log::debug!(
            "rendered {url} in {:.2}s ({} bytes)",
            started.elapsed().as_secs_f64(),
            html.len()
        );
        Ok(html)
    }

    async fn shutdown(&self) -> RenderResult<()> {
        let Some(mut session) = self.session.lock().await.take() else {
            return Ok(());
        };

        log::info!("closing chromium session");
        let closed = session.browser.close().await;
        if let Err(err) = session.browser.wait().await {
            log::debug!("waiting for chromium exit failed: {err}");
        }
        session.handler.abort();

        closed
            .map(|_| ())
            .map_err(|err| RenderError::Launch(err.to_string()))
    }
}

// Polls until the document reports `complete`. The caller bounds the total
// wait; evaluation errors (non-HTML documents) end the poll early.
async fn wait_for_ready_state(page: &Page) {
    loop {
        match page.evaluate("document.readyState").await {
            Ok(result) => {
                let state: String = result.into_value().unwrap_or_default();
                if state == "complete" {
                    return;
                }
            }
            Err(err) => {
                log::debug!("could not read document.readyState: {err}");
                return;
            }
        }
        tokio::time::sleep(READY_STATE_POLL).await;
    }
}
