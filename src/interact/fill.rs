use std::time::Duration;

use serde_json::{json, Value};

use super::retry::retry;
use super::script;
use super::wait::wait_for_selector;
use crate::browser::BrowserSession;
use crate::config::Timeouts;
use crate::error::{LoginError, Result};

const FILL_ATTEMPTS: u32 = 3;
const FILL_DELAY: Duration = Duration::from_millis(150);

fn assign_value_script(selector: &str, value: &str) -> String {
    script::build(
        "set-value",
        r#"const el = document.querySelector(args.selector);
if (!el) return false;
el.focus();
el.value = "";
el.dispatchEvent(new Event("input", { bubbles: true }));
el.value = args.value;
el.dispatchEvent(new Event("input", { bubbles: true }));
el.dispatchEvent(new Event("change", { bubbles: true }));
return true;"#,
        &json!({ "selector": selector, "value": value }),
    )
}

fn read_value_script(selector: &str) -> String {
    script::build(
        "read-value",
        r#"const el = document.querySelector(args.selector);
return el ? el.value : null;"#,
        &json!({ "selector": selector }),
    )
}

fn select_all_script(selector: &str) -> String {
    script::build(
        "select-all",
        r#"const el = document.querySelector(args.selector);
if (!el) return false;
el.focus();
if (typeof el.select === "function") el.select();
return true;"#,
        &json!({ "selector": selector }),
    )
}

/// Current `value` of the first element matching `selector`.
pub async fn read_value(session: &dyn BrowserSession, selector: &str) -> Result<Option<String>> {
    let value = session.evaluate(&read_value_script(selector)).await?;
    Ok(match value {
        Value::String(s) => Some(s),
        _ => None,
    })
}

/// Focus the element and select its whole content, so the next keystrokes
/// replace it.
pub async fn select_all(session: &dyn BrowserSession, selector: &str) -> Result<()> {
    session.evaluate(&select_all_script(selector)).await?;
    Ok(())
}

/// Set the input with id `field_id` to `value` and confirm the page sees it.
///
/// The value is first assigned directly with synthetic `input`/`change`
/// events. Pages that only listen to real keystrokes ignore that, so on a
/// mismatch the content is selected and typed instead. Still mismatched
/// after that is [`LoginError::FieldWriteFailure`]. The whole sequence is
/// retried a few times.
pub async fn fill_field(
    session: &dyn BrowserSession,
    field_id: &str,
    value: &str,
    timeouts: &Timeouts,
) -> Result<()> {
    let selector = format!("#{field_id}");
    let label = format!("fill {selector}");
    let selector = selector.as_str();
    let (timeout, interval) = (timeouts.short, timeouts.tiny);

    retry(&label, FILL_ATTEMPTS, FILL_DELAY, || async move {
        wait_for_selector(session, selector, timeout, interval).await?;
        session.evaluate(&assign_value_script(selector, value)).await?;

        if read_value(session, selector).await?.as_deref() == Some(value) {
            return Ok(());
        }

        tracing::debug!("{selector}: direct assignment not observed, typing instead");
        select_all(session, selector).await?;
        session.type_text(selector, value).await?;

        if read_value(session, selector).await?.as_deref() == Some(value) {
            Ok(())
        } else {
            Err(LoginError::FieldWriteFailure {
                field: field_id.to_string(),
            })
        }
    })
    .await
}
