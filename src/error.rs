//! Error taxonomy for the login flow.
//!
//! Optional-step misses never leave the [`crate::interact`] layer; everything
//! that does reach a caller of [`crate::login::Authenticator`] is one of the
//! required-outcome failures below.

use std::path::PathBuf;
use std::time::Duration;

/// Errors produced while driving a browser session through login.
#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    /// A bounded wait elapsed before its condition held.
    #[error("timed out after {}ms waiting for {what}", .after.as_millis())]
    Timeout { what: String, after: Duration },

    /// An optional element was not present. Logged and absorbed by the
    /// interaction primitives; exposed so probes can report it.
    #[error("optional UI element not found: {0}")]
    TransientUiMiss(String),

    /// The post-flow authentication check came back negative.
    #[error("login failed: session is not authenticated")]
    VerificationFailure,

    /// A required form field kept a different value after both write strategies.
    #[error("failed to set #{field}")]
    FieldWriteFailure { field: String },

    /// A cookie file or cookie string could not be used.
    #[error("invalid cookie source {}: {reason}", .path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "<inline>".to_string()))]
    CookieSourceInvalid {
        path: Option<PathBuf>,
        reason: String,
    },

    /// The configured 2FA secret is not valid base32.
    #[error("invalid two-factor secret: {0}")]
    InvalidTwoFactorSecret(String),

    /// The browser collaborator could not produce a session.
    #[error("failed to launch browser: {0}")]
    SessionLaunch(#[source] anyhow::Error),

    /// Any other failure reported by the browser collaborator.
    #[error(transparent)]
    Browser(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl LoginError {
    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            what: what.into(),
            after,
        }
    }

    /// True for the bounded-wait failure, which callers may choose to swallow.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type Result<T, E = LoginError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_distinguishable() {
        let err = LoginError::timeout("#m_login_email", Duration::from_millis(6000));
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "timed out after 6000ms waiting for #m_login_email"
        );
        assert!(!LoginError::VerificationFailure.is_timeout());
    }

    #[test]
    fn cookie_source_message_names_inline_source() {
        let err = LoginError::CookieSourceInvalid {
            path: None,
            reason: "empty".to_string(),
        };
        assert_eq!(err.to_string(), "invalid cookie source <inline>: empty");
    }
}
