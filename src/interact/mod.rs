//! Resilient page interaction: retries, bounded polls, and element lookup by
//! visible text or accessible label.
//!
//! Nothing here knows about logging in. Optional steps report a
//! [`ProbeOutcome`] instead of failing; required steps return errors.

mod fill;
mod locate;
mod retry;
pub mod script;
mod wait;

pub use fill::{fill_field, read_value, select_all};
pub use locate::{click_by_text, click_text_once, select_radio_by_aria_label};
pub use retry::retry;
pub use wait::{wait_for_selector, wait_until};

use crate::error::{LoginError, Result};

/// Selector for the element most recently located by text or label.
///
/// Locator scripts tag their match with this attribute so the click can be
/// delivered as a real mouse event through [`crate::browser::BrowserSession::click`].
pub const TARGET_SELECTOR: &str = "[data-fbsession-target]";

/// Result of probing for an optional element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Found and acted on.
    Found,
    /// Every attempt failed for a reason other than a timeout.
    NotFound,
    /// The last attempt ran out of time waiting for the element.
    TimedOut,
}

impl ProbeOutcome {
    pub fn from_result<T>(result: &Result<T, LoginError>) -> Self {
        match result {
            Ok(_) => Self::Found,
            Err(e) if e.is_timeout() => Self::TimedOut,
            Err(_) => Self::NotFound,
        }
    }

    pub fn is_found(self) -> bool {
        self == Self::Found
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Found => "found",
            Self::NotFound => "not-found",
            Self::TimedOut => "timed-out",
        })
    }
}
