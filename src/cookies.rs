//! Session cookies: normalization, the on-disk snapshot, and moving cookies
//! in and out of a browser session.
//!
//! The snapshot is a pretty-printed JSON array of [`Cookie`] records in the
//! browser's own camelCase shape, so a file exported from a browser extension
//! can be dropped in place and read back through [`load`] + [`normalize`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::BrowserSession;
use crate::error::{LoginError, Result};

/// `expires` value of a cookie that lives for the browser session only.
pub const SESSION_EXPIRY: f64 = -1.0;

fn session_expiry() -> f64 {
    SESSION_EXPIRY
}

fn default_path() -> String {
    "/".to_string()
}

/// A normalized cookie. Name and value are always non-empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub same_party: bool,
    /// Unix timestamp in seconds, or [`SESSION_EXPIRY`].
    #[serde(default = "session_expiry")]
    pub expires: f64,
}

impl Cookie {
    /// Session cookie on `domain` with path `/`.
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
            path: default_path(),
            secure: false,
            http_only: false,
            same_party: false,
            expires: SESSION_EXPIRY,
        }
    }

    pub fn is_session(&self) -> bool {
        self.expires == SESSION_EXPIRY
    }
}

/// A loosely typed cookie record as exported by browsers and extensions.
///
/// Any field may be missing or of the wrong type; [`normalize`] decides what
/// is usable.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawCookie {
    #[serde(default)]
    pub name: Option<Value>,
    #[serde(default)]
    pub key: Option<Value>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub domain: Option<Value>,
    #[serde(default)]
    pub path: Option<Value>,
    #[serde(default)]
    pub secure: Option<Value>,
    #[serde(default, rename = "httpOnly")]
    pub http_only: Option<Value>,
    #[serde(default, rename = "sameParty")]
    pub same_party: Option<Value>,
    #[serde(default)]
    pub expires: Option<Value>,
    #[serde(default, rename = "expirationDate")]
    pub expiration_date: Option<Value>,
}

impl RawCookie {
    pub fn pair(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: Some(Value::String(name.into())),
            value: Some(Value::String(value.into())),
            ..Self::default()
        }
    }
}

impl From<&Cookie> for RawCookie {
    fn from(cookie: &Cookie) -> Self {
        serde_json::to_value(cookie)
            .and_then(serde_json::from_value)
            .unwrap_or_default()
    }
}

/// Cookies supplied by a caller.
#[derive(Debug, Clone)]
pub enum CookieInput {
    /// Structured records, e.g. a browser export.
    Records(Vec<RawCookie>),
    /// A `Cookie:` header value: `"k1=v1; k2=v2"`.
    Header(String),
}

impl CookieInput {
    /// Interpret a JSON document: an array becomes records, a string a header.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::String(header) => Ok(Self::Header(header)),
            Value::Array(_) => serde_json::from_value(value)
                .map(Self::Records)
                .map_err(|e| LoginError::CookieSourceInvalid {
                    path: None,
                    reason: e.to_string(),
                }),
            other => Err(LoginError::CookieSourceInvalid {
                path: None,
                reason: format!("expected an array or a string, got {}", json_kind(&other)),
            }),
        }
    }

    pub fn normalize(&self, default_domain: &str) -> Vec<Cookie> {
        match self {
            Self::Records(records) => normalize(records, default_domain),
            Self::Header(header) => parse_cookie_header(header, default_domain),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Non-empty string form of a scalar, following JavaScript truthiness: empty
/// strings, `0`, `false` and `null` count as missing.
fn truthy_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.as_f64().is_some_and(|f| f != 0.0) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        Value::Array(_) | Value::Object(_) => value.map(|v| v.to_string()),
        _ => None,
    }
}

fn truthy(value: Option<&Value>) -> bool {
    value.is_some_and(crate::interact::script::is_truthy)
}

fn positive_number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|f| *f > 0.0)
}

/// Map raw records to cookies, silently dropping those without a name or
/// value. Order is preserved.
pub fn normalize(raw: &[RawCookie], default_domain: &str) -> Vec<Cookie> {
    raw.iter()
        .filter_map(|record| {
            let name = truthy_string(record.name.as_ref())
                .or_else(|| truthy_string(record.key.as_ref()))?;
            let value = truthy_string(record.value.as_ref())?;
            let expires = positive_number(record.expires.as_ref())
                .or_else(|| positive_number(record.expiration_date.as_ref()))
                .unwrap_or(SESSION_EXPIRY);

            Some(Cookie {
                name,
                value,
                domain: truthy_string(record.domain.as_ref())
                    .unwrap_or_else(|| default_domain.to_string()),
                path: truthy_string(record.path.as_ref()).unwrap_or_else(default_path),
                secure: truthy(record.secure.as_ref()),
                http_only: truthy(record.http_only.as_ref()),
                same_party: record
                    .same_party
                    .as_ref()
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                expires,
            })
        })
        .collect()
}

/// Parse a `Cookie:` header value. Pairs without `=` are skipped; values may
/// themselves contain `=`.
pub fn parse_cookie_header(header: &str, default_domain: &str) -> Vec<Cookie> {
    let records: Vec<RawCookie> = header
        .split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| {
            let (name, value) = part.split_once('=')?;
            let mut record = RawCookie::pair(name.trim(), value.trim());
            record.domain = Some(Value::String(default_domain.to_string()));
            record.path = Some(Value::String(default_path()));
            Some(record)
        })
        .collect();
    normalize(&records, default_domain)
}

/// Format cookies as a `Cookie:` header value.
pub fn cookie_header(cookies: &[Cookie]) -> String {
    cookies
        .iter()
        .map(|c| format!("{}={}", c.name, c.value))
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn find<'a>(cookies: &'a [Cookie], name: &str) -> Option<&'a Cookie> {
    cookies.iter().find(|c| c.name == name)
}

/// Install the whole set in one call. Empty input is a no-op.
pub async fn apply(session: &dyn BrowserSession, cookies: &[Cookie]) -> Result<()> {
    if cookies.is_empty() {
        return Ok(());
    }
    session.set_cookies(cookies).await?;
    tracing::debug!(count = cookies.len(), "applied cookies");
    Ok(())
}

/// The live cookie set for `origin`.
pub async fn read_all(session: &dyn BrowserSession, origin: &str) -> Result<Vec<Cookie>> {
    Ok(session.cookies(origin).await?)
}

/// Load a snapshot. A missing file is `Ok(None)`; unreadable or malformed
/// content is [`LoginError::CookieSourceInvalid`].
pub fn load(path: &Path) -> Result<Option<Vec<RawCookie>>> {
    if !path.exists() {
        return Ok(None);
    }

    let invalid = |reason: String| LoginError::CookieSourceInvalid {
        path: Some(path.to_path_buf()),
        reason,
    };
    let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
    let records = serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;
    Ok(Some(records))
}

/// Overwrite the snapshot at `path` with `cookies`. `None` disables
/// persistence. Returns whether the file was written; identical content is
/// left untouched.
pub fn persist(path: Option<&Path>, cookies: &[Cookie]) -> Result<bool> {
    let Some(path) = path else {
        return Ok(false);
    };

    let content = serde_json::to_string_pretty(cookies)
        .map_err(|e| LoginError::Browser(anyhow::anyhow!("Failed to serialize cookies: {e}")))?;

    if std::fs::read_to_string(path).is_ok_and(|existing| existing == content) {
        tracing::debug!(path = %path.display(), "cookie snapshot unchanged");
        return Ok(false);
    }

    std::fs::write(path, content)?;
    tracing::debug!(path = %path.display(), count = cookies.len(), "saved cookie snapshot");
    Ok(true)
}

/// Poll the live cookies every `step` for up to `total` until the cookie
/// named `name` shows up. Read failures count as "not yet".
pub async fn wait_for_identity_cookie(
    session: &dyn BrowserSession,
    origin: &str,
    name: &str,
    total: Duration,
    step: Duration,
) -> bool {
    let deadline = tokio::time::Instant::now() + total;
    loop {
        match session.cookies(origin).await {
            Ok(cookies) if find(&cookies, name).is_some() => return true,
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "cookie read failed while waiting for {name}"),
        }
        if tokio::time::Instant::now() + step > deadline {
            return false;
        }
        tokio::time::sleep(step).await;
    }
}

/// Where a login request reads and writes its cookie snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CookiesFile {
    /// Use the configured default path, if any.
    #[default]
    Default,
    /// Never read or write a snapshot, even when a default is configured.
    Disabled,
    Path(PathBuf),
}

impl CookiesFile {
    pub fn resolve(&self, configured: Option<&Path>) -> Option<PathBuf> {
        match self {
            Self::Default => configured.map(Path::to_path_buf),
            Self::Disabled => None,
            Self::Path(path) => Some(path.clone()),
        }
    }
}
