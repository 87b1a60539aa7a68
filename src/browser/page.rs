//! Login page capability interface
//!
//! The state machine and its tests depend on this trait rather than on a
//! specific browser-driver binding.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use super::BrowserError;

/// Capabilities the login state machine needs from a browser page.
///
/// One implementation is live per in-flight attempt; `close` disposes the
/// underlying browser and is idempotent.
pub trait LoginPage {
    /// Navigate to a URL and wait for the load to settle.
    fn navigate(&self, url: &str) -> impl Future<Output = Result<(), BrowserError>>;

    /// Wait until the element matching `selector` is present and enabled.
    fn wait_for_clickable(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), BrowserError>>;

    /// Wait until the current URL contains `needle`.
    fn wait_for_url_contains(
        &self,
        needle: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), BrowserError>>;

    /// Fill the username/password controls and submit the form.
    fn fill_and_submit_login(
        &self,
        username: &str,
        password: &str,
    ) -> impl Future<Output = Result<(), BrowserError>>;

    /// Current page URL.
    fn current_url(&self) -> impl Future<Output = Result<String, BrowserError>>;

    /// Whether the underlying browser is still usable.
    fn is_alive(&self) -> bool;

    /// Save a PNG screenshot of the current page (post-mortem artifact).
    fn screenshot(&self, path: &Path) -> impl Future<Output = Result<(), BrowserError>>;

    /// Console log entries captured so far (post-mortem artifact).
    fn console_logs(&self) -> impl Future<Output = Vec<String>>;

    /// Dispose the browser. Must not be reused afterwards.
    fn close(&self) -> impl Future<Output = Result<(), BrowserError>>;
}

/// Allocates one fresh session per login attempt.
pub trait SessionFactory {
    type Session: LoginPage;

    fn create(&self) -> impl Future<Output = Result<Self::Session, BrowserError>>;
}
