//! Chrome DevTools Protocol backend for [`BrowserSession`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetTouchEmulationEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::fetch::{
    self, ContinueRequestParams, EventRequestPaused, FailRequestParams, RequestPattern,
    RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, ErrorReason, GetCookiesParams, ResourceType, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::handler::viewport::Viewport as ChromeViewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::{close_on_error, BrowserSession, SessionLauncher};
use crate::config::BrowserSettings;
use crate::cookies::{Cookie, SESSION_EXPIRY};

/// Emulated device: user agent plus screen metrics.
#[derive(Debug, Clone, Copy)]
pub struct DeviceProfile {
    pub name: &'static str,
    pub user_agent: &'static str,
    pub width: i64,
    pub height: i64,
    pub device_scale_factor: f64,
    pub mobile: bool,
}

const DEVICES: &[DeviceProfile] = &[
    DeviceProfile {
        name: "iPhone 15 Pro",
        user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
        width: 393,
        height: 852,
        device_scale_factor: 3.0,
        mobile: true,
    },
    DeviceProfile {
        name: "iPhone 13",
        user_agent: "Mozilla/5.0 (iPhone; CPU iPhone OS 15_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.0 Mobile/15E148 Safari/604.1",
        width: 390,
        height: 844,
        device_scale_factor: 3.0,
        mobile: true,
    },
    DeviceProfile {
        name: "Pixel 7",
        user_agent: "Mozilla/5.0 (Linux; Android 14; Pixel 7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Mobile Safari/537.36",
        width: 412,
        height: 915,
        device_scale_factor: 2.625,
        mobile: true,
    },
];

/// Look up a built-in device profile by name (case-insensitive).
pub fn device_profile(name: &str) -> Option<&'static DeviceProfile> {
    DEVICES
        .iter()
        .find(|device| device.name.eq_ignore_ascii_case(name.trim()))
}

/// Launches Chrome/Chromium through chromiumoxide.
#[derive(Debug, Clone, Default)]
pub struct ChromiumLauncher;

#[async_trait]
impl SessionLauncher for ChromiumLauncher {
    async fn launch(&self, settings: &BrowserSettings) -> Result<Box<dyn BrowserSession>> {
        Ok(Box::new(ChromiumSession::launch(settings).await?))
    }
}

/// One browser process with a single page.
pub struct ChromiumSession {
    browser: Mutex<Option<Browser>>,
    page: Page,
    handler_task: JoinHandle<()>,
    intercept_task: Option<JoinHandle<()>>,
}

impl ChromiumSession {
    pub async fn launch(settings: &BrowserSettings) -> Result<Self> {
        let chrome_path = match &settings.executable_path {
            Some(path) => path.clone(),
            None => find_chrome().context(
                "Chrome/Chromium not found. Install it or set CHROME_EXECUTABLE_PATH.",
            )?,
        };

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);
        if !settings.headless {
            builder = builder.with_head();
        }
        builder = match settings.viewport {
            Some(viewport) => builder
                .window_size(viewport.width, viewport.height)
                .viewport(Some(ChromeViewport {
                    width: viewport.width,
                    height: viewport.height,
                    ..ChromeViewport::default()
                })),
            None => builder.viewport(None),
        };
        for arg in &settings.args {
            builder = builder.arg(arg.as_str());
        }
        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to configure browser: {e}"))?;

        tracing::info!(headless = settings.headless, "launching browser");
        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;
        let handler_task = tokio::spawn(async move { while (handler.next().await).is_some() {} });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler_task.abort();
                return Err(e).context("Failed to open page");
            }
        };

        let mut session = Self {
            browser: Mutex::new(Some(browser)),
            page,
            handler_task,
            intercept_task: None,
        };

        let prepared = session.prepare(settings).await;
        close_on_error(&session, prepared).await?;
        Ok(session)
    }

    /// Device emulation and request blocking on the fresh page.
    async fn prepare(&mut self, settings: &BrowserSettings) -> Result<()> {
        if let Some(name) = settings.device.as_deref() {
            match device_profile(name) {
                Some(device) => {
                    self.emulate(device).await?;
                    tracing::debug!(device = device.name, "emulated device");
                }
                None => tracing::warn!(device = name, "unknown device profile, not emulating"),
            }
        }

        if settings.block_requests {
            self.intercept_task = Some(self.enable_request_blocking().await?);
        }
        Ok(())
    }

    async fn emulate(&self, device: &DeviceProfile) -> Result<()> {
        self.page
            .execute(SetUserAgentOverrideParams::new(device.user_agent))
            .await?;

        let metrics = SetDeviceMetricsOverrideParams::builder()
            .width(device.width)
            .height(device.height)
            .device_scale_factor(device.device_scale_factor)
            .mobile(device.mobile)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build device metrics: {e}"))?;
        self.page.execute(metrics).await?;
        self.page
            .execute(SetTouchEmulationEnabledParams::new(device.mobile))
            .await?;
        Ok(())
    }

    /// Abort images, fonts, stylesheets and media; let everything else through.
    async fn enable_request_blocking(&self) -> Result<JoinHandle<()>> {
        let patterns = vec![RequestPattern {
            url_pattern: Some("*".to_string()),
            resource_type: None,
            request_stage: Some(RequestStage::Request),
        }];

        self.page
            .execute(fetch::EnableParams {
                patterns: Some(patterns),
                handle_auth_requests: None,
            })
            .await?;

        let mut request_events = self.page.event_listener::<EventRequestPaused>().await?;
        let page = self.page.clone();

        Ok(tokio::spawn(async move {
            while let Some(event) = request_events.next().await {
                let blocked = matches!(
                    event.resource_type,
                    ResourceType::Image
                        | ResourceType::Font
                        | ResourceType::Stylesheet
                        | ResourceType::Media
                );
                let result = if blocked {
                    page.execute(FailRequestParams::new(
                        event.request_id.clone(),
                        ErrorReason::BlockedByClient,
                    ))
                    .await
                    .map(|_| ())
                } else {
                    page.execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ())
                };
                if let Err(e) = result {
                    tracing::trace!(error = %e, "request interception reply failed");
                }
            }
        }))
    }
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .with_context(|| format!("Navigation to {url} timed out"))??;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.page.url().await?.unwrap_or_default())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .await_promise(true)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build evaluation: {e}"))?;
        let result = self.page.evaluate_expression(params).await?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.page.find_element(selector).await?.click().await?;
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let element = self.page.find_element(selector).await?;
        element.focus().await?;
        element.type_str(text).await?;
        Ok(())
    }

    async fn press_key(&self, selector: &str, key: &str) -> Result<()> {
        let element = self.page.find_element(selector).await?;
        element.focus().await?;
        element.press_key(key).await?;
        Ok(())
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.page.wait_for_navigation())
            .await
            .context("Timed out waiting for navigation")??;
        Ok(())
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        let params = cookies
            .iter()
            .map(to_cookie_param)
            .collect::<Result<Vec<_>>>()?;
        self.page.set_cookies(params).await?;
        Ok(())
    }

    async fn cookies(&self, origin: &str) -> Result<Vec<Cookie>> {
        let params = GetCookiesParams::builder().url(origin).build();
        let response = self.page.execute(params).await?;

        let mut cookies = Vec::with_capacity(response.result.cookies.len());
        for cookie in &response.result.cookies {
            let value = serde_json::to_value(cookie)?;
            cookies.push(serde_json::from_value(value).context("Unexpected cookie shape")?);
        }
        Ok(cookies)
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        let data = self.page.screenshot(ScreenshotParams::builder().build()).await?;
        tokio::fs::write(path, data)
            .await
            .with_context(|| format!("Failed to write screenshot: {}", path.display()))?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };
        if let Some(task) = &self.intercept_task {
            task.abort();
        }
        if let Err(e) = browser.close().await {
            tracing::debug!(error = %e, "browser close returned error");
        }
        let _ = browser.wait().await;
        self.handler_task.abort();
        Ok(())
    }
}

fn to_cookie_param(cookie: &Cookie) -> Result<CookieParam> {
    let mut value = serde_json::json!({
        "name": cookie.name,
        "value": cookie.value,
        "domain": cookie.domain,
        "path": cookie.path,
        "secure": cookie.secure,
        "httpOnly": cookie.http_only,
    });
    if cookie.expires != SESSION_EXPIRY {
        value["expires"] = serde_json::json!(cookie.expires);
    }
    serde_json::from_value(value).context("Failed to build cookie parameter")
}

/// Find Chrome/Chromium executable.
fn find_chrome() -> Option<PathBuf> {
    for binary in ["google-chrome", "chromium", "chromium-browser"] {
        if let Ok(output) = std::process::Command::new("which").arg(binary).output() {
            if output.status.success() {
                let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !path.is_empty() {
                    return Some(PathBuf::from(path));
                }
            }
        }
    }

    let candidates = [
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // NixOS
        "/run/current-system/sw/bin/google-chrome",
        "/run/current-system/sw/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
    ];

    candidates
        .into_iter()
        .map(PathBuf::from)
        .find(|candidate| candidate.exists())
}
