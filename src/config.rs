use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::duration::{deserialize_duration, serialize_duration};

/// Name of the config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "fbsession.toml";

fn default_launch_args() -> Vec<String> {
    vec![
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
    ]
}

fn default_device() -> Option<String> {
    Some("iPhone 15 Pro".to_string())
}

/// Fixed viewport size in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

/// How the browser is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Run without a visible window.
    pub headless: bool,

    /// Chrome/Chromium binary. Discovered on `PATH` and in common install
    /// locations when unset.
    pub executable_path: Option<PathBuf>,

    /// Extra command-line flags passed to the browser.
    pub args: Vec<String>,

    /// Device emulation profile (e.g. "iPhone 15 Pro"). `None` disables emulation.
    pub device: Option<String>,

    /// Fixed viewport. When unset the emulated device (or window) size is used.
    pub viewport: Option<Viewport>,

    /// Abort image, font, stylesheet and media requests.
    pub block_requests: bool,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            executable_path: None,
            args: default_launch_args(),
            device: default_device(),
            viewport: None,
            block_requests: true,
        }
    }
}

/// URLs and cookie names of the target site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    /// Origin whose cookies make up the session.
    pub origin: String,
    pub login_url: String,
    pub home_url: String,
    /// Domain given to cookies that arrive without one.
    pub cookie_domain: String,
    /// Cookie whose value is the account id of the signed-in user.
    pub identity_cookie: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            origin: "https://m.facebook.com".to_string(),
            login_url: "https://m.facebook.com/login".to_string(),
            home_url: "https://m.facebook.com/".to_string(),
            cookie_domain: ".facebook.com".to_string(),
            identity_cookie: "c_user".to_string(),
        }
    }
}

/// Bounds for navigation and polling waits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Page navigations.
    #[serde(
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub nav: Duration,

    /// Element lookups and other short polls.
    #[serde(
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub short: Duration,

    /// Interval between re-evaluations in every bounded wait.
    #[serde(
        serialize_with = "serialize_duration",
        deserialize_with = "deserialize_duration"
    )]
    pub tiny: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            nav: Duration::from_secs(30),
            short: Duration::from_secs(6),
            tiny: Duration::from_millis(300),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default cookie snapshot file. If relative, resolved from the config
    /// file location. Unset means cookies are not persisted unless a login
    /// request names a file.
    pub cookies_path: Option<PathBuf>,

    /// Where the diagnostic screenshot is written when login fails.
    pub screenshot_path: PathBuf,

    pub browser: BrowserSettings,
    pub site: SiteConfig,
    pub timeouts: Timeouts,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cookies_path: None,
            screenshot_path: PathBuf::from("error-screenshot.png"),
            browser: BrowserSettings::default(),
            site: SiteConfig::default(),
            timeouts: Timeouts::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file, resolving relative paths against the
    /// file's directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        let config_dir = path.parent().unwrap_or_else(|| Path::new("."));
        config.resolve_paths(config_dir);

        Ok(config)
    }

    /// Load config from a file, or return default config if file doesn't exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn resolve_paths(&mut self, config_dir: &Path) {
        if let Some(cookies_path) = &self.cookies_path {
            if cookies_path.is_relative() {
                self.cookies_path = Some(config_dir.join(cookies_path));
            }
        }
        if self.screenshot_path.is_relative() {
            self.screenshot_path = config_dir.join(&self.screenshot_path);
        }
    }

    /// Apply `HEADLESS`, `COOKIES_PATH` and `CHROME_EXECUTABLE_PATH` from the
    /// process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Apply environment overrides from an arbitrary lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(headless) = lookup("HEADLESS") {
            self.browser.headless = headless.trim() != "false";
        }
        if let Some(path) = lookup("COOKIES_PATH").filter(|p| !p.trim().is_empty()) {
            self.cookies_path = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("CHROME_EXECUTABLE_PATH").filter(|p| !p.trim().is_empty()) {
            self.browser.executable_path = Some(PathBuf::from(path));
        }
    }
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./fbsession.toml` if it exists in current directory
/// 2. `~/.config/fbsession/fbsession.toml` (XDG config directory)
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from(CONFIG_FILE_NAME);
    if local_config.exists() {
        return local_config;
    }

    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("fbsession").join(CONFIG_FILE_NAME);
    }

    local_config
}
