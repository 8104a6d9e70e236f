use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thirtyfour::prelude::*;
use thirtyfour::ChromiumLikeCapabilities;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Result, ScoutError};

/// Close the browser after this long without an active page.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);
const PAGE_LOAD_TIMEOUT: Duration = Duration::from_secs(30);
/// Wait after load for client-side rendering to settle.
const SETTLE_DELAY: Duration = Duration::from_secs(2);
const CLICK_WAIT: Duration = Duration::from_millis(1500);
const SCROLL_CYCLES: usize = 3;
const SCROLL_WAIT: Duration = Duration::from_secs(1);

const BROWSER_ARGS: &[&str] = &[
    "--headless=new",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-gpu",
    "--disable-extensions",
    "--window-size=1366,900",
    "--user-agent=Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36",
];

/// Visible labels of "reveal more postings" controls. At most one match is
/// clicked per label.
const LOAD_MORE_LABELS: &[&str] = &[
    "load more",
    "show more",
    "view more",
    "see more",
    "more jobs",
    "more positions",
    "show all",
    "view all jobs",
    "see all jobs",
];

/// Something that can turn a URL into fully rendered HTML.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<String>;

    /// Release any underlying resources. Safe to call when nothing is open.
    async fn shutdown(&self);
}

/// One open browser.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn render(&self, url: &str) -> Result<String>;

    /// Close the browser. A session that is already gone is not an error.
    async fn quit(&self);
}

/// Opens browser sessions on demand.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>>;
}

/// Launches headless Chrome through a WebDriver server.
pub struct WebDriverLauncher {
    webdriver_url: String,
}

impl WebDriverLauncher {
    pub fn new(webdriver_url: impl Into<String>) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
        }
    }
}

#[async_trait]
impl SessionLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Arc<dyn BrowserSession>> {
        info!(webdriver = %self.webdriver_url, "Launching browser");
        let mut caps = DesiredCapabilities::chrome();
        for arg in BROWSER_ARGS {
            caps.add_arg(arg)?;
        }
        let driver = WebDriver::new(self.webdriver_url.as_str(), caps)
            .await
            .map_err(|e| {
                ScoutError::upstream(
                    "browser",
                    format!("Failed to start browser session at {}: {}", self.webdriver_url, e),
                )
            })?;
        driver.set_page_load_timeout(PAGE_LOAD_TIMEOUT).await?;
        Ok(Arc::new(WebDriverSession(driver)))
    }
}

struct WebDriverSession(WebDriver);

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn render(&self, url: &str) -> Result<String> {
        render_page(&self.0, url).await
    }

    async fn quit(&self) {
        // The session may already be gone (crash, manual close); that is fine.
        if let Err(e) = self.0.clone().quit().await {
            debug!(error = %e, "Browser was already closed");
        }
    }
}

#[derive(Default)]
struct BrowserState {
    session: Option<Arc<dyn BrowserSession>>,
    active_pages: usize,
    last_used: Option<Instant>,
    idle_timer: Option<JoinHandle<()>>,
}

impl BrowserState {
    fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }
}

/// Owns the single browser session used for heuristic crawls.
///
/// The session is launched on first `acquire()`, and closed either by the
/// idle timer armed in `release()` or by an explicit `shutdown()`.
pub struct BrowserManager {
    launcher: Arc<dyn SessionLauncher>,
    state: Arc<Mutex<BrowserState>>,
}

impl BrowserManager {
    pub fn new(webdriver_url: impl Into<String>) -> Self {
        Self::with_launcher(Arc::new(WebDriverLauncher::new(webdriver_url)))
    }

    pub fn with_launcher(launcher: Arc<dyn SessionLauncher>) -> Self {
        Self {
            launcher,
            state: Arc::new(Mutex::new(BrowserState::default())),
        }
    }

    /// Hand out the session, launching it if needed. Cancels a pending idle close.
    pub async fn acquire(&self) -> Result<Arc<dyn BrowserSession>> {
        let mut state = self.state.lock().await;
        state.cancel_idle_timer();

        let session = match state.session.clone() {
            Some(session) => session,
            None => {
                let session = self.launcher.launch().await?;
                state.session = Some(Arc::clone(&session));
                session
            }
        };
        state.active_pages += 1;
        state.last_used = Some(Instant::now());
        Ok(session)
    }

    /// Mark a page as finished and arm the idle timer once no pages remain.
    pub async fn release(&self) {
        let mut state = self.state.lock().await;
        state.active_pages = state.active_pages.saturating_sub(1);
        state.last_used = Some(Instant::now());

        if state.active_pages == 0 && state.session.is_some() {
            state.cancel_idle_timer();
            let shared = Arc::clone(&self.state);
            state.idle_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(IDLE_TIMEOUT).await;
                idle_close(&shared).await;
            }));
        }
    }

    #[cfg(test)]
    async fn is_running(&self) -> bool {
        self.state.lock().await.session.is_some()
    }
}

/// Runs when the idle timer fires. Closes only if nothing touched the
/// browser in the meantime.
async fn idle_close(state: &Mutex<BrowserState>) {
    let mut state = state.lock().await;
    let idle_long_enough = state
        .last_used
        .is_some_and(|used| used.elapsed() >= IDLE_TIMEOUT);
    if state.active_pages > 0 || !idle_long_enough {
        return;
    }
    state.idle_timer = None;
    if let Some(session) = state.session.take() {
        info!("Closing idle browser");
        session.quit().await;
    }
}

#[async_trait]
impl PageRenderer for BrowserManager {
    async fn render(&self, url: &str) -> Result<String> {
        let session = self.acquire().await?;
        let result = session.render(url).await;
        self.release().await;
        result
    }

    async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.cancel_idle_timer();
        state.active_pages = 0;
        if let Some(session) = state.session.take() {
            info!("Closing browser");
            session.quit().await;
        }
    }
}

async fn render_page(driver: &WebDriver, url: &str) -> Result<String> {
    debug!(url, "Navigating");
    match tokio::time::timeout(PAGE_LOAD_TIMEOUT + Duration::from_secs(5), driver.goto(url)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            return Err(ScoutError::upstream(
                "browser",
                format!("Navigation to {} failed: {}", url, e),
            ));
        }
        Err(_) => {
            return Err(ScoutError::upstream(
                "browser",
                format!(
                    "Navigation to {} timed out after {}s",
                    url,
                    PAGE_LOAD_TIMEOUT.as_secs()
                ),
            ));
        }
    }
    tokio::time::sleep(SETTLE_DELAY).await;

    expand_listings(driver).await;

    for _ in 0..SCROLL_CYCLES {
        driver
            .execute("window.scrollTo(0, document.body.scrollHeight);", Vec::new())
            .await?;
        tokio::time::sleep(SCROLL_WAIT).await;
    }

    Ok(driver.source().await?)
}

/// Click the first visible control for each "load more" label. Failures
/// here only cost postings, so they are logged and skipped.
async fn expand_listings(driver: &WebDriver) {
    for label in LOAD_MORE_LABELS {
        let xpath = load_more_xpath(label);
        let candidates = match driver.find_all(By::XPath(xpath.as_str())).await {
            Ok(elements) => elements,
            Err(e) => {
                debug!(label, error = %e, "Load-more lookup failed");
                continue;
            }
        };

        for element in candidates {
            if !element.is_displayed().await.unwrap_or(false) {
                continue;
            }
            match element.click().await {
                Ok(()) => {
                    debug!(label, "Clicked load-more control");
                    tokio::time::sleep(CLICK_WAIT).await;
                }
                Err(e) => warn!(label, error = %e, "Load-more click failed"),
            }
            break;
        }
    }
}

fn load_more_xpath(label: &str) -> String {
    format!(
        "//*[self::button or self::a or @role='button']\
         [contains(translate(normalize-space(.), 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz'), '{}')]",
        label
    )
}
