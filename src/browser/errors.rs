//! Browser error types

use thiserror::Error;

/// Browser-related errors.
///
/// `ConnectionLost` means the browser instance became unusable outside the
/// attempt's own control (external closure, crashed process); it is fatal for
/// the whole batch, unlike the per-phase variants.
#[derive(Error, Debug)]
pub enum BrowserError {
    #[error("failed to launch browser: {0}")]
    LaunchFailed(String),

    #[error("navigation failed: {0}")]
    NavigationFailed(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("input failed: {0}")]
    Input(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
