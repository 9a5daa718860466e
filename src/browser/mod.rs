//! The controllable browser the login flow drives.
//!
//! The flow only talks to a [`BrowserSession`]; the Chrome DevTools backed
//! implementation lives in [`chromium`].

#[cfg(feature = "chromium")]
pub mod chromium;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::config::BrowserSettings;
use crate::cookies::Cookie;

/// A live page in a browser the caller controls.
///
/// Implementations report failures as `anyhow::Error`; bounded waits are
/// built on top of these calls by [`crate::interact`].
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Navigate and wait for the DOM to load, failing after `timeout`.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Evaluate an expression in the page and return its JSON value.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Click the first element matching `selector` with a real mouse event.
    async fn click(&self, selector: &str) -> Result<()>;

    /// Focus the element and send `text` as keystrokes.
    async fn type_text(&self, selector: &str, text: &str) -> Result<()>;

    /// Focus the element and press a single named key (e.g. "Backspace").
    async fn press_key(&self, selector: &str, key: &str) -> Result<()>;

    /// Wait for the next navigation to finish, failing after `timeout`.
    async fn wait_for_navigation(&self, timeout: Duration) -> Result<()>;

    /// Install all cookies in one batch.
    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()>;

    /// Cookies the browser would send to `origin`.
    async fn cookies(&self, origin: &str) -> Result<Vec<Cookie>>;

    async fn screenshot(&self, path: &Path) -> Result<()>;

    /// Shut the browser down. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Produces fresh browser sessions.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, settings: &BrowserSettings) -> Result<Box<dyn BrowserSession>>;
}

/// Pass `result` through, closing `session` first when it is an error.
///
/// Used while a session is still being set up, so a failed step does not
/// leave a browser process behind.
pub async fn close_on_error<T>(session: &dyn BrowserSession, result: Result<T>) -> Result<T> {
    if result.is_err() {
        if let Err(e) = session.close().await {
            tracing::debug!(error = %e, "closing browser after failed setup");
        }
    }
    result
}
