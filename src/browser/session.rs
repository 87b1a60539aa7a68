//! Chrome browser session
//!
//! One disposable Chrome instance per login attempt, driven over the DevTools
//! protocol. The event handler task doubles as liveness detection: when the
//! handler stream ends, Chrome has disconnected and the session is dead.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chromiumoxide::browser::{Browser, BrowserConfig, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::log as cdp_log;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tracing::{debug, info, warn};

use super::{BrowserError, LoginPage, SessionFactory};
use crate::settings::Settings;

/// How often bounded waits re-check their condition.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Configuration for a browser session.
#[derive(Debug, Clone)]
pub struct BrowserSessionConfig {
    /// Run in headless mode.
    pub headless: bool,
    /// Window width.
    pub window_width: u32,
    /// Window height.
    pub window_height: u32,
    /// CSS selector for the username input.
    pub username_selector: String,
    /// CSS selector for the password input.
    pub password_selector: String,
}

impl Default for BrowserSessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1920,
            window_height: 1080,
            username_selector: "#username".to_string(),
            password_selector: "#password".to_string(),
        }
    }
}

impl BrowserSessionConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            headless: settings.headless,
            username_selector: settings.username_selector.clone(),
            password_selector: settings.password_selector.clone(),
            ..Default::default()
        }
    }
}

/// A disposable Chrome session owned by exactly one login attempt.
pub struct ChromeSession {
    browser: tokio::sync::Mutex<Option<Browser>>,
    page: Page,
    config: BrowserSessionConfig,
    /// Flipped off when the event handler stream ends (Chrome disconnected).
    alive: Arc<AtomicBool>,
    handler_task: tokio::task::JoinHandle<()>,
    console_task: tokio::task::JoinHandle<()>,
    console_logs: Arc<Mutex<Vec<String>>>,
}

impl ChromeSession {
    /// Launch a fresh Chrome instance.
    pub async fn launch(config: BrowserSessionConfig) -> Result<Self, BrowserError> {
        info!("launching browser session (headless: {})", config.headless);

        let mut builder = BrowserConfig::builder()
            .window_size(config.window_width, config.window_height)
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage");
        builder = if config.headless {
            builder.headless_mode(HeadlessMode::New)
        } else {
            builder.with_head()
        };
        let browser_config = builder
            .build()
            .map_err(BrowserError::LaunchFailed)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // When the handler ends, Chrome has disconnected or crashed.
        let alive = Arc::new(AtomicBool::new(true));
        let alive_for_handler = alive.clone();
        let handler_task = tokio::spawn(async move {
            while handler.next().await.is_some() {}
            warn!("Chrome disconnected (event handler ended)");
            alive_for_handler.store(false, Ordering::Relaxed);
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;

        // Capture console entries for post-mortem artifacts.
        let console_logs: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        page.execute(cdp_log::EnableParams::default())
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;
        let mut entries = page
            .event_listener::<cdp_log::EventEntryAdded>()
            .await
            .map_err(|e| BrowserError::LaunchFailed(e.to_string()))?;
        let logs_for_listener = console_logs.clone();
        let console_task = tokio::spawn(async move {
            while let Some(event) = entries.next().await {
                let entry = &event.entry;
                if let Ok(mut logs) = logs_for_listener.lock() {
                    logs.push(format!("[{:?}] {}", entry.level, entry.text));
                }
            }
        });

        Ok(Self {
            browser: tokio::sync::Mutex::new(Some(browser)),
            page,
            config,
            alive,
            handler_task,
            console_task,
            console_logs,
        })
    }

    /// True while the element exists and is not disabled.
    async fn is_clickable(&self, selector: &str) -> bool {
        if self.page.find_element(selector).await.is_err() {
            return false;
        }
        let quoted = serde_json::to_string(selector).unwrap_or_default();
        let js = format!(
            "(() => {{ const el = document.querySelector({quoted}); return !!el && !el.disabled; }})()"
        );
        match self.page.evaluate(js).await {
            Ok(result) => result.into_value::<bool>().unwrap_or(false),
            Err(_) => false,
        }
    }

    fn check_alive(&self) -> Result<(), BrowserError> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(BrowserError::ConnectionLost("browser disconnected".into()))
        }
    }
}

impl LoginPage for ChromeSession {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.check_alive()?;
        debug!("navigating to: {}", url);
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::NavigationFailed(e.to_string()))?;
        Ok(())
    }

    async fn wait_for_clickable(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_alive()?;
            if self.is_clickable(selector).await {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "element {selector} not clickable within {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn wait_for_url_contains(
        &self,
        needle: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_alive()?;
            if let Ok(Some(url)) = self.page.url().await {
                if url.contains(needle) {
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::Timeout(format!(
                    "URL did not contain {needle:?} within {}s",
                    timeout.as_secs()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn fill_and_submit_login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(), BrowserError> {
        self.check_alive()?;

        let username_input = self
            .page
            .find_element(&self.config.username_selector)
            .await
            .map_err(|e| {
                BrowserError::ElementNotFound(format!("{}: {e}", self.config.username_selector))
            })?;
        username_input
            .click()
            .await
            .map_err(|e| BrowserError::Input(e.to_string()))?;
        username_input
            .type_str(username)
            .await
            .map_err(|e| BrowserError::Input(e.to_string()))?;

        let password_input = self
            .page
            .find_element(&self.config.password_selector)
            .await
            .map_err(|e| {
                BrowserError::ElementNotFound(format!("{}: {e}", self.config.password_selector))
            })?;
        password_input
            .click()
            .await
            .map_err(|e| BrowserError::Input(e.to_string()))?;
        password_input
            .type_str(password)
            .await
            .map_err(|e| BrowserError::Input(e.to_string()))?;
        // Enter in the password field submits the Keycloak form.
        password_input
            .press_key("Enter")
            .await
            .map_err(|e| BrowserError::Input(e.to_string()))?;

        Ok(())
    }

    async fn current_url(&self) -> Result<String, BrowserError> {
        self.page
            .url()
            .await
            .map_err(|e| BrowserError::ConnectionLost(e.to_string()))?
            .ok_or_else(|| BrowserError::ConnectionLost("no current URL".into()))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn screenshot(&self, path: &Path) -> Result<(), BrowserError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.page
            .save_screenshot(params, path)
            .await
            .map_err(|e| BrowserError::Io(std::io::Error::other(e.to_string())))?;
        Ok(())
    }

    async fn console_logs(&self) -> Vec<String> {
        self.console_logs
            .lock()
            .map(|logs| logs.clone())
            .unwrap_or_default()
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.alive.store(false, Ordering::Relaxed);
        self.console_task.abort();

        let mut browser = self.browser.lock().await;
        if let Some(mut b) = browser.take() {
            // Graceful close first, then make sure the process is gone.
            let _ = b.close().await;
            let _ = b.wait().await;
            let _ = b.kill().await;
        }
        self.handler_task.abort();

        info!("browser session closed");
        Ok(())
    }
}

/// Launches one fresh [`ChromeSession`] per attempt.
pub struct ChromeSessionFactory {
    config: BrowserSessionConfig,
}

impl ChromeSessionFactory {
    pub fn new(config: BrowserSessionConfig) -> Self {
        Self { config }
    }
}

impl SessionFactory for ChromeSessionFactory {
    type Session = ChromeSession;

    async fn create(&self) -> Result<ChromeSession, BrowserError> {
        ChromeSession::launch(self.config.clone()).await
    }
}
