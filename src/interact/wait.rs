use std::time::Duration;

use serde_json::{json, Value};
use tokio::time::Instant;

use super::script;
use crate::browser::BrowserSession;
use crate::error::{LoginError, Result};

/// Poll `condition` every `interval` until it evaluates to a truthy value,
/// for at most `timeout`.
///
/// Evaluation errors (a page mid-navigation, a context not yet created) count
/// as "not yet". Running out of time is [`LoginError::Timeout`].
pub async fn wait_until(
    session: &dyn BrowserSession,
    what: &str,
    condition: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<Value> {
    let deadline = Instant::now() + timeout;
    loop {
        match session.evaluate(condition).await {
            Ok(value) if script::is_truthy(&value) => return Ok(value),
            Ok(_) => {}
            Err(e) => tracing::trace!(error = %e, "waiting for {what}: evaluation failed"),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(LoginError::timeout(what, timeout));
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

fn selector_exists_script(selector: &str) -> String {
    script::build(
        "selector-exists",
        "return !!document.querySelector(args.selector);",
        &json!({ "selector": selector }),
    )
}

/// Wait for an element matching `selector` to exist.
pub async fn wait_for_selector(
    session: &dyn BrowserSession,
    selector: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<()> {
    let condition = selector_exists_script(selector);
    wait_until(session, selector, &condition, timeout, interval).await?;
    Ok(())
}
