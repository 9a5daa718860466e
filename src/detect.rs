//! Decide whether a browser session is signed in.
//!
//! Detection runs as a pipeline of checks, strongest first. Each check adds
//! an [`AuthSignal`]; the verdict is derived from the signals collected so
//! far, and the pipeline stops as soon as the verdict can no longer change.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::browser::BrowserSession;
use crate::config::{SiteConfig, Timeouts};
use crate::cookies::{self, Cookie};
use crate::error::Result;
use crate::interact::{retry, script, wait_for_selector, wait_until};

/// The home page's avatar button, only rendered for signed-in users.
pub const PROFILE_BUTTON: &str = r#"[role="button"][aria-label="Go to profile"]"#;

const LOGIN_INPUTS: &str = r#"#m_login_email, input[name="email"][type="text"], input[name="pass"]"#;

const HOME_NAV_TIMEOUT: Duration = Duration::from_secs(20);
const PROFILE_BUTTON_TIMEOUT: Duration = Duration::from_secs(12);
const PROFILE_CLICK_WAIT: Duration = Duration::from_secs(8);
const PROFILE_CLICK_ATTEMPTS: u32 = 3;
const PROFILE_CLICK_DELAY: Duration = Duration::from_millis(350);
const PROFILE_NAV_TIMEOUT: Duration = Duration::from_secs(10);
const HEADING_TIMEOUT: Duration = Duration::from_secs(6);

static CHALLENGE_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)checkpoint|two_step|approvals|recover").expect("valid challenge regex")
});

/// Links and headings that only appear inside an authenticated shell.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UiPresence {
    pub logout: bool,
    pub settings: bool,
    pub messages: bool,
    pub friends: bool,
    pub heading_text: Option<String>,
}

impl UiPresence {
    pub fn any(&self) -> bool {
        self.logout
            || self.settings
            || self.messages
            || self.friends
            || self.heading_text.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// One observation made while evaluating a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthSignal {
    /// The home page turned out to be a login form or a challenge screen.
    LoginLikePage { url: String },
    ProfileButton(bool),
    /// Value of the identity cookie in the snapshot taken before navigating.
    IdentityCookie(Option<String>),
    /// Display name read from the profile page.
    ProfileHeading(String),
    SecondaryUi(UiPresence),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthState {
    pub authenticated: bool,
    #[serde(rename = "userID")]
    pub user_id: Option<String>,
    #[serde(rename = "profileName")]
    pub profile_name: Option<String>,
}

impl AuthState {
    pub fn unauthenticated() -> Self {
        Self::default()
    }
}

/// The ordered signals and the verdict they produce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvaluation {
    pub signals: Vec<AuthSignal>,
    pub state: AuthState,
}

impl AuthEvaluation {
    /// Derive the verdict from `signals`.
    ///
    /// A login-like page is always negative. Otherwise at least one of the
    /// profile button or the identity cookie is required, and without a
    /// profile heading some secondary UI (or the cookie) must back it up.
    /// When the secondary UI could not be read at all the earlier evidence
    /// stands.
    pub fn from_signals(signals: Vec<AuthSignal>) -> Self {
        let mut login_like = false;
        let mut profile_button = false;
        let mut user_id = None;
        let mut heading = None;
        let mut ui = None;

        for signal in &signals {
            match signal {
                AuthSignal::LoginLikePage { .. } => login_like = true,
                AuthSignal::ProfileButton(found) => profile_button = *found,
                AuthSignal::IdentityCookie(value) => user_id = value.clone(),
                AuthSignal::ProfileHeading(name) => heading = Some(name.clone()),
                AuthSignal::SecondaryUi(presence) => ui = Some(presence),
            }
        }

        let authenticated = if login_like || (!profile_button && user_id.is_none()) {
            false
        } else if heading.is_some() {
            true
        } else {
            ui.map_or(true, |ui| ui.any() || user_id.is_some())
        };

        let state = if authenticated {
            AuthState {
                authenticated,
                profile_name: heading.or_else(|| ui.and_then(|ui| ui.heading_text.clone())),
                user_id,
            }
        } else {
            AuthState::unauthenticated()
        };

        Self { signals, state }
    }
}

/// Checkpoint, two-step, approval and recovery pages, or any `/login/` path.
pub fn is_login_like_url(url: &str) -> bool {
    CHALLENGE_URL_RE.is_match(url) || url.to_ascii_lowercase().contains("/login/")
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct LoginLikeProbe {
    has_login_input: bool,
    url: String,
}

fn login_like_script() -> String {
    script::build(
        "login-like",
        "return { hasLoginInput: !!document.querySelector(args.selector), url: location.href };",
        &json!({ "selector": LOGIN_INPUTS }),
    )
}

fn url_matches_script() -> String {
    script::build(
        "url-matches",
        r#"return /profile\.php|\/profile\//i.test(location.href);"#,
        &json!({}),
    )
}

fn heading_script() -> String {
    script::build(
        "heading",
        r#"const el = document.querySelector('[role="heading"]');
if (!el) return null;
return el.getAttribute("aria-label") || (el.textContent || "").trim() || null;"#,
        &json!({}),
    )
}

fn ui_presence_script() -> String {
    script::build(
        "ui-presence",
        r#"const heading = document.querySelector('[role="heading"]');
return {
  logout: !!document.querySelector('a[href*="/logout.php"]'),
  settings: !!document.querySelector('a[href^="/settings"]'),
  messages: !!document.querySelector('a[href^="/messages"]'),
  friends: !!document.querySelector('a[href^="/friends"]'),
  headingText: heading ? (heading.getAttribute("aria-label") || (heading.textContent || "").trim() || null) : null,
};"#,
        &json!({}),
    )
}

/// Runs the detection pipeline against a live session.
pub struct Detector<'a> {
    site: &'a SiteConfig,
    timeouts: &'a Timeouts,
}

impl<'a> Detector<'a> {
    pub fn new(site: &'a SiteConfig, timeouts: &'a Timeouts) -> Self {
        Self { site, timeouts }
    }

    pub async fn is_authenticated(&self, session: &dyn BrowserSession) -> Result<AuthState> {
        Ok(self.evaluate(session).await?.state)
    }

    /// Navigates the session to the home page (and possibly the profile).
    /// Only the initial cookie read can fail; every later check degrades to
    /// a weaker signal.
    pub async fn evaluate(&self, session: &dyn BrowserSession) -> Result<AuthEvaluation> {
        let snapshot = cookies::read_all(session, &self.site.origin).await?;
        log_snapshot(&snapshot);

        if let Ok(url) = session.current_url().await {
            tracing::debug!(url = %url, "auth check: before navigation");
        }
        if let Err(e) = session.goto(&self.site.home_url, HOME_NAV_TIMEOUT).await {
            tracing::warn!(error = %e, "auth check: navigation to home failed");
        }

        let mut signals = Vec::new();

        if let Some(url) = self.login_like_page(session).await {
            tracing::debug!(url = %url, "auth check: login-like page");
            signals.push(AuthSignal::LoginLikePage { url });
            return Ok(AuthEvaluation::from_signals(signals));
        }

        let interval = self.timeouts.tiny;
        let has_profile_button =
            wait_for_selector(session, PROFILE_BUTTON, PROFILE_BUTTON_TIMEOUT, interval)
                .await
                .is_ok();
        let user_id = cookies::find(&snapshot, &self.site.identity_cookie).map(|c| c.value.clone());
        tracing::debug!(
            profile_button = has_profile_button,
            user_id = user_id.as_deref().unwrap_or("null"),
            "auth check: primary signals"
        );
        signals.push(AuthSignal::ProfileButton(has_profile_button));
        signals.push(AuthSignal::IdentityCookie(user_id.clone()));
        if !has_profile_button && user_id.is_none() {
            return Ok(AuthEvaluation::from_signals(signals));
        }

        if has_profile_button {
            self.open_profile(session).await;
            if let Some(name) = self.profile_heading(session).await {
                signals.push(AuthSignal::ProfileHeading(name));
                return Ok(AuthEvaluation::from_signals(signals));
            }
        }

        match session.evaluate(&ui_presence_script()).await {
            Ok(value) => match serde_json::from_value::<UiPresence>(value) {
                Ok(ui) => signals.push(AuthSignal::SecondaryUi(ui)),
                Err(e) => tracing::debug!(error = %e, "auth check: unreadable UI probe"),
            },
            Err(e) => tracing::debug!(error = %e, "auth check: UI probe failed"),
        }

        Ok(AuthEvaluation::from_signals(signals))
    }

    async fn login_like_page(&self, session: &dyn BrowserSession) -> Option<String> {
        let value = match session.evaluate(&login_like_script()).await {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "auth check: login-like probe failed");
                return None;
            }
        };
        let probe: LoginLikeProbe = serde_json::from_value(value).unwrap_or_default();
        (probe.has_login_input || is_login_like_url(&probe.url)).then_some(probe.url)
    }

    /// Click through to the profile page and wait for it to load. Best effort.
    async fn open_profile(&self, session: &dyn BrowserSession) {
        let interval = self.timeouts.tiny;
        let clicked: Result<()> = retry(
            "click profile button",
            PROFILE_CLICK_ATTEMPTS,
            PROFILE_CLICK_DELAY,
            || async move {
                tracing::info!("auth check: clicking profile button");
                wait_for_selector(session, PROFILE_BUTTON, PROFILE_CLICK_WAIT, interval).await?;
                session.click(PROFILE_BUTTON).await?;
                Ok(())
            },
        )
        .await;
        if clicked.is_err() {
            return;
        }

        let url_check = url_matches_script();
        tokio::select! {
            _ = session.wait_for_navigation(PROFILE_NAV_TIMEOUT) => {}
            _ = wait_until(session, "profile url", &url_check, PROFILE_NAV_TIMEOUT, interval) => {}
        }

        if let Ok(url) = session.current_url().await {
            tracing::debug!(url = %url, "auth check: after profile click");
        }
    }

    async fn profile_heading(&self, session: &dyn BrowserSession) -> Option<String> {
        let heading = heading_script();
        let interval = self.timeouts.tiny;
        match wait_until(session, "profile heading", &heading, HEADING_TIMEOUT, interval).await {
            Ok(Value::String(name)) if !name.trim().is_empty() => Some(name.trim().to_string()),
            _ => None,
        }
    }
}

fn log_snapshot(snapshot: &[Cookie]) {
    let mut names: Vec<&str> = snapshot.iter().map(|c| c.name.as_str()).collect();
    names.sort_unstable();
    let session_only = snapshot.iter().filter(|c| c.is_session()).count();
    tracing::debug!(
        count = snapshot.len(),
        session_only,
        names = %names.join(", "),
        "auth check: cookie snapshot"
    );
}
