#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use fbsession::browser::{BrowserSession, SessionLauncher};
use fbsession::config::{BrowserSettings, Config};
use fbsession::cookies::Cookie;
use fbsession::detect::PROFILE_BUTTON;
use fbsession::interact::{script, TARGET_SELECTOR};
use serde_json::{json, Value};

pub const EMAIL: &str = "jane@example.com";
pub const PASSWORD: &str = "correct horse";
pub const USER_ID: &str = "100012345";
pub const PROFILE_NAME: &str = "Jane Doe";

/// Base32 of "12345678901234567890"; at unix time 59 the code is 287082.
pub const TOTP_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";
pub const TOTP_TIME: i64 = 59;
pub const TOTP_CODE: &str = "287082";

pub const CODE_INPUT: &str = r#"input[aria-label="Code"],input[name="approvals_code"]"#;
pub const SAVE_BUTTON: &str = r#"[role="button"][aria-label="Save"]"#;

const HOME_URL: &str = "https://m.facebook.com/";
const LOGIN_URL: &str = "https://m.facebook.com/login";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Blank,
    Login,
    /// Approval screen offering "Try another way".
    Approvals,
    /// Verification method chooser with radio buttons.
    Chooser,
    CodeEntry,
    SavePrompt,
    Checkpoint,
    Home,
    Profile,
}

/// How the simulated site behaves.
#[derive(Debug, Clone)]
pub struct SiteBehavior {
    /// Show the "I already have an account" welcome screen on the login page.
    pub welcome: bool,
    /// Credentials are accepted. Rejected logins land on a checkpoint.
    pub accept_credentials: bool,
    /// Ask for a one-time code after the password.
    pub two_factor: bool,
    /// Route two-factor through "Try another way" and the method chooser.
    pub chooser: bool,
    /// Offer to save the browser after login.
    pub save_prompt: bool,
    /// Inputs ignore direct `value` assignment and only take keystrokes.
    pub ignore_assignment: bool,
    /// Inputs ignore keystrokes too.
    pub ignore_typing: bool,
    /// Elements are re-rendered between being located and being clicked.
    pub rerender_on_click: bool,
}

impl Default for SiteBehavior {
    fn default() -> Self {
        Self {
            welcome: false,
            accept_credentials: true,
            two_factor: false,
            chooser: false,
            save_prompt: false,
            ignore_assignment: false,
            ignore_typing: false,
            rerender_on_click: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Text(String),
    Radio,
}

#[derive(Debug)]
struct State {
    behavior: SiteBehavior,
    page: Page,
    url: String,
    welcome_shown: bool,
    jar: Vec<Cookie>,
    fields: HashMap<String, String>,
    selected: Option<String>,
    target: Option<Target>,
    radio_checked: bool,
    navigation_pending: bool,
    calls: Vec<String>,
    closed: bool,
}

/// A scripted stand-in for a browser page on the mobile site.
///
/// Scripts are recognised by the tag in their envelope and answered from the
/// simulated page state. Every call is recorded.
#[derive(Clone)]
pub struct FakeSession {
    state: Arc<Mutex<State>>,
}

fn norm(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

impl FakeSession {
    pub fn new(behavior: SiteBehavior) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                welcome_shown: behavior.welcome,
                behavior,
                page: Page::Blank,
                url: "about:blank".to_string(),
                jar: Vec::new(),
                fields: HashMap::new(),
                selected: None,
                target: None,
                radio_checked: false,
                navigation_pending: false,
                calls: Vec::new(),
                closed: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn with_cookie(self, name: &str, value: &str) -> Self {
        self.lock()
            .jar
            .push(Cookie::new(name, value, ".facebook.com"));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.lock().calls.iter().any(|c| c.starts_with(prefix))
    }

    pub fn page(&self) -> Page {
        self.lock().page
    }

    pub fn field(&self, selector: &str) -> Option<String> {
        self.lock().fields.get(selector).cloned()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn jar(&self) -> Vec<Cookie> {
        self.lock().jar.clone()
    }
}

impl State {
    fn signed_in(&self) -> bool {
        self.jar
            .iter()
            .any(|c| c.name == "c_user" && c.value == USER_ID)
    }

    fn navigate(&mut self, page: Page, url: &str) {
        self.page = page;
        self.url = url.to_string();
        self.target = None;
        self.selected = None;
        self.navigation_pending = true;
    }

    fn grant_session(&mut self) {
        self.jar.retain(|c| c.name != "c_user");
        self.jar.push(Cookie::new("c_user", USER_ID, ".facebook.com"));
        self.jar.push(Cookie::new("xs", "session-secret", ".facebook.com"));
    }

    fn after_verification(&mut self) {
        self.grant_session();
        if self.behavior.save_prompt {
            self.navigate(Page::SavePrompt, "https://m.facebook.com/login/save-device/");
        } else {
            self.navigate(Page::Home, HOME_URL);
        }
    }

    fn selector_exists(&self, selector: &str) -> bool {
        match self.page {
            Page::Login => {
                selector == "#m_login_email"
                    || selector == "#m_login_password"
                    || selector.contains("m_login_email")
            }
            Page::CodeEntry => selector == CODE_INPUT,
            Page::SavePrompt => selector == SAVE_BUTTON,
            Page::Home => selector == PROFILE_BUTTON,
            _ => false,
        }
    }

    fn buttons(&self) -> &'static [&'static str] {
        match self.page {
            Page::Login => &["Log in"],
            Page::Approvals => &["Try another way"],
            Page::Chooser | Page::CodeEntry => &["Continue"],
            _ => &[],
        }
    }

    fn answer(&mut self, tag: &str, args: &Value) -> Value {
        let arg = |key: &str| args[key].as_str().unwrap_or_default().to_string();
        match tag {
            "selector-exists" => json!(self.selector_exists(&arg("selector"))),
            "click-text-once" => {
                let hit = self.page == Page::Login
                    && self.welcome_shown
                    && norm(&arg("text")) == "i already have an account";
                if hit {
                    self.welcome_shown = false;
                }
                json!(hit)
            }
            "find-by-text" => {
                let want = norm(&arg("text"));
                let exact = args["exact"].as_bool().unwrap_or(false);
                let found = self.buttons().iter().map(|b| norm(b)).find(|b| {
                    if exact {
                        *b == want
                    } else {
                        b.contains(&want)
                    }
                });
                self.target = found.map(Target::Text);
                if self.target.is_some() {
                    json!(true)
                } else {
                    Value::Null
                }
            }
            "find-radio" => {
                let label = "authentication app, get a code from your authentication app";
                let matches = self.page == Page::Chooser
                    && args["labels"]
                        .as_array()
                        .is_some_and(|l| l.iter().all(|w| label.contains(w.as_str().unwrap_or("?"))));
                self.target = matches.then_some(Target::Radio);
                if matches {
                    json!(true)
                } else {
                    Value::Null
                }
            }
            "radio-checked" => json!(self.page == Page::Chooser && self.radio_checked),
            "set-value" => {
                if self.selector_exists(&arg("selector")) && !self.behavior.ignore_assignment {
                    self.fields.insert(arg("selector"), arg("value"));
                }
                json!(true)
            }
            "read-value" => self
                .fields
                .get(&arg("selector"))
                .map_or(json!(""), |v| json!(v)),
            "select-all" => {
                self.selected = Some(arg("selector"));
                json!(true)
            }
            "login-like" => json!({
                "hasLoginInput": self.page == Page::Login,
                "url": self.url,
            }),
            "url-matches" => json!(self.page == Page::Profile),
            "heading" => match self.page {
                Page::Profile => json!(PROFILE_NAME),
                _ => Value::Null,
            },
            "ui-presence" => {
                let home = matches!(self.page, Page::Home | Page::Profile);
                json!({
                    "logout": home,
                    "settings": home,
                    "messages": false,
                    "friends": false,
                    "headingText": null,
                })
            }
            _ => Value::Null,
        }
    }

    fn click_target(&mut self) -> Result<()> {
        if self.behavior.rerender_on_click {
            self.target = None;
            bail!("node is detached from document");
        }
        match self.target.take() {
            Some(Target::Radio) => {
                self.radio_checked = true;
                Ok(())
            }
            Some(Target::Text(text)) => {
                match (self.page, text.as_str()) {
                    (Page::Login, "log in") => self.submit_credentials(),
                    (Page::Approvals, "try another way") => {
                        self.navigate(Page::Chooser, "https://m.facebook.com/checkpoint/?method");
                    }
                    (Page::Chooser, "continue") if self.radio_checked => {
                        self.navigate(Page::CodeEntry, "https://m.facebook.com/checkpoint/?code");
                    }
                    (Page::CodeEntry, "continue") => {
                        if self.fields.get(CODE_INPUT).map(String::as_str) == Some(TOTP_CODE) {
                            self.after_verification();
                        }
                    }
                    _ => {}
                }
                Ok(())
            }
            None => bail!("no element matches {TARGET_SELECTOR}"),
        }
    }

    fn submit_credentials(&mut self) {
        let email = self.fields.get("#m_login_email").cloned();
        let password = self.fields.get("#m_login_password").cloned();
        let valid = self.behavior.accept_credentials
            && email.as_deref() == Some(EMAIL)
            && password.as_deref() == Some(PASSWORD);

        if !valid {
            self.navigate(Page::Checkpoint, "https://m.facebook.com/checkpoint/?next");
        } else if !self.behavior.two_factor {
            self.after_verification();
        } else if self.behavior.chooser {
            self.navigate(Page::Approvals, "https://m.facebook.com/checkpoint/?approvals");
        } else {
            self.navigate(Page::CodeEntry, "https://m.facebook.com/checkpoint/?code");
        }
    }
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn goto(&self, url: &str, _timeout: Duration) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("goto {url}"));
        if url == LOGIN_URL {
            state.navigate(Page::Login, "https://m.facebook.com/login/");
        } else if url == HOME_URL {
            if state.signed_in() {
                state.navigate(Page::Home, HOME_URL);
            } else {
                state.navigate(Page::Login, "https://m.facebook.com/login/?next=%2F");
            }
        } else {
            bail!("unexpected navigation to {url}");
        }
        state.navigation_pending = false;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok(self.lock().url.clone())
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        let Some((tag, args)) = script::parse(script) else {
            bail!("unrecognised script");
        };
        let mut state = self.lock();
        state.calls.push(format!("eval {tag}"));
        Ok(state.answer(tag, &args))
    }

    async fn click(&self, selector: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("click {selector}"));
        if selector == TARGET_SELECTOR {
            return state.click_target();
        }
        if !state.selector_exists(selector) {
            bail!("no element matches {selector}");
        }
        match state.page {
            Page::Home if selector == PROFILE_BUTTON => {
                state.navigate(Page::Profile, "https://m.facebook.com/profile.php?id=100012345");
            }
            Page::SavePrompt if selector == SAVE_BUTTON => state.navigate(Page::Home, HOME_URL),
            _ => {}
        }
        Ok(())
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("type {selector}"));
        if !state.selector_exists(selector) {
            bail!("no element matches {selector}");
        }
        if state.behavior.ignore_typing {
            return Ok(());
        }
        let replace = state.selected.take().as_deref() == Some(selector);
        let field = state.fields.entry(selector.to_string()).or_default();
        if replace {
            field.clear();
        }
        field.push_str(text);
        Ok(())
    }

    async fn press_key(&self, selector: &str, key: &str) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("key {key}"));
        if key == "Backspace" {
            if state.selected.take().as_deref() == Some(selector) {
                state.fields.insert(selector.to_string(), String::new());
            } else if let Some(field) = state.fields.get_mut(selector) {
                field.pop();
            }
        }
        Ok(())
    }

    async fn wait_for_navigation(&self, timeout: Duration) -> Result<()> {
        let pending = std::mem::take(&mut self.lock().navigation_pending);
        if pending {
            return Ok(());
        }
        tokio::time::sleep(timeout).await;
        bail!("navigation timeout")
    }

    async fn set_cookies(&self, cookies: &[Cookie]) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(format!("set_cookies {}", cookies.len()));
        for cookie in cookies {
            state.jar.retain(|c| c.name != cookie.name);
            state.jar.push(cookie.clone());
        }
        Ok(())
    }

    async fn cookies(&self, _origin: &str) -> Result<Vec<Cookie>> {
        Ok(self.lock().jar.clone())
    }

    async fn screenshot(&self, path: &Path) -> Result<()> {
        self.lock().calls.push("screenshot".to_string());
        std::fs::write(path, b"\x89PNG fake")?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.lock();
        state.calls.push("close".to_string());
        state.closed = true;
        Ok(())
    }
}

/// Hands out the same [`FakeSession`] on every launch.
pub struct FakeLauncher {
    session: Option<FakeSession>,
}

impl FakeLauncher {
    pub fn new(session: FakeSession) -> Arc<Self> {
        Arc::new(Self {
            session: Some(session),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self { session: None })
    }
}

#[async_trait]
impl SessionLauncher for FakeLauncher {
    async fn launch(&self, _settings: &BrowserSettings) -> Result<Box<dyn BrowserSession>> {
        match &self.session {
            Some(session) => Ok(Box::new(session.clone())),
            None => bail!("chrome not found"),
        }
    }
}

/// Default config with file artifacts under `dir`.
pub fn test_config(dir: &Path, cookies_path: Option<PathBuf>) -> Config {
    Config {
        cookies_path,
        screenshot_path: dir.join("error-screenshot.png"),
        ..Config::default()
    }
}

/// Write a cookie snapshot the way the orchestrator persists it.
pub fn write_snapshot(path: &Path, cookies: &[Cookie]) -> Result<()> {
    std::fs::write(path, serde_json::to_string_pretty(cookies)?)?;
    Ok(())
}

pub fn session_cookies() -> Vec<Cookie> {
    vec![
        Cookie::new("c_user", USER_ID, ".facebook.com"),
        Cookie::new("xs", "session-secret", ".facebook.com"),
    ]
}
