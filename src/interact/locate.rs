use std::time::Duration;

use serde_json::json;

use super::retry::retry;
use super::wait::wait_until;
use super::{script, ProbeOutcome, TARGET_SELECTOR};
use crate::browser::BrowserSession;
use crate::config::Timeouts;
use crate::error::{LoginError, Result};

const NORMALIZE_JS: &str = r#"const norm = (s) => (s || "").replace(/\s+/g, " ").trim().toLowerCase();"#;

const CLEAR_TARGET_JS: &str = r#"document.querySelectorAll("[data-fbsession-target]").forEach((el) => el.removeAttribute("data-fbsession-target"));"#;

fn find_by_text_script(text: &str, exact: bool) -> String {
    let body = format!(
        r#"{NORMALIZE_JS}
{CLEAR_TARGET_JS}
const want = norm(args.text);
const nodes = document.querySelectorAll('button,[role="button"],a,div,span');
for (const el of nodes) {{
  const txt = norm(el.innerText);
  if (!txt) continue;
  const hit = args.exact ? txt === want : txt.includes(want);
  if (!hit) continue;
  if (el.closest('[aria-disabled="true"],[disabled]')) continue;
  const actionable = el.tagName === "BUTTON" || el.getAttribute("role") === "button" || el.tagName === "A";
  const btn = actionable ? el : el.closest('button,[role="button"],a');
  if (btn) {{
    btn.setAttribute("data-fbsession-target", "1");
    return true;
  }}
}}
return null;"#
    );
    script::build("find-by-text", &body, &json!({ "text": text, "exact": exact }))
}

fn find_radio_script(labels: &[String]) -> String {
    let body = format!(
        r#"{NORMALIZE_JS}
{CLEAR_TARGET_JS}
for (const el of document.querySelectorAll('[role="radio"]')) {{
  const label = norm(el.getAttribute("aria-label"));
  if (args.labels.every((w) => label.includes(w))) {{
    el.setAttribute("data-fbsession-target", "1");
    return true;
  }}
}}
return null;"#
    );
    script::build("find-radio", &body, &json!({ "labels": labels }))
}

fn radio_checked_script(labels: &[String]) -> String {
    let body = format!(
        r#"{NORMALIZE_JS}
const selected = document.querySelector('[role="radio"][aria-checked="true"]');
if (!selected) return false;
const label = norm(selected.getAttribute("aria-label"));
return args.labels.every((w) => label.includes(w));"#
    );
    script::build("radio-checked", &body, &json!({ "labels": labels }))
}

fn click_text_once_script(text: &str) -> String {
    let body = format!(
        r#"{NORMALIZE_JS}
const want = norm(args.text);
for (const el of document.querySelectorAll('span,button,[role="button"],a,div')) {{
  if (norm(el.innerText) === want) {{
    const btn = el.closest('button,[role="button"],a') || el;
    btn.click();
    return true;
  }}
}}
return false;"#
    );
    script::build("click-text-once", &body, &json!({ "text": text }))
}

/// Click the interactive element whose text matches `text`.
///
/// Each attempt polls every `timeouts.tiny` for up to `timeouts.short`.
/// Text is compared after collapsing whitespace and lowercasing; `exact`
/// chooses equality over containment. Elements under a disabled ancestor
/// are skipped and the click lands on the nearest button, `role="button"`
/// or link.
///
/// The element is optional: running out of attempts is logged and reported
/// through the outcome, never as an error.
pub async fn click_by_text(
    session: &dyn BrowserSession,
    text: &str,
    attempts: u32,
    delay: Duration,
    exact: bool,
    timeouts: &Timeouts,
) -> ProbeOutcome {
    let label = format!("click \"{text}\"");
    let finder = find_by_text_script(text, exact);

    let (what, finder) = (label.as_str(), finder.as_str());
    let (timeout, interval) = (timeouts.short, timeouts.tiny);

    let result: Result<()> = retry(what, attempts, delay, || async move {
        wait_until(session, what, finder, timeout, interval).await?;
        click_target(session, what).await?;
        Ok(())
    })
    .await;

    report(&label, &result)
}

/// Select the radio button whose aria-label contains every one of
/// `label_parts` (case-insensitive), then wait until the page reports that
/// radio as checked.
///
/// Optional like [`click_by_text`].
pub async fn select_radio_by_aria_label(
    session: &dyn BrowserSession,
    label_parts: &[&str],
    attempts: u32,
    delay: Duration,
    timeouts: &Timeouts,
) -> ProbeOutcome {
    let labels: Vec<String> = label_parts.iter().map(|s| s.to_lowercase()).collect();
    let label = format!("select radio {labels:?}");
    let finder = find_radio_script(&labels);
    let checked = radio_checked_script(&labels);
    let checked_label = format!("{label} checked");
    let (what, finder, checked, checked_label) = (
        label.as_str(),
        finder.as_str(),
        checked.as_str(),
        checked_label.as_str(),
    );
    let (timeout, interval) = (timeouts.short, timeouts.tiny);

    let result: Result<()> = retry(what, attempts, delay, || async move {
        wait_until(session, what, finder, timeout, interval).await?;
        click_target(session, what).await?;
        wait_until(session, checked_label, checked, timeout, interval).await?;
        Ok(())
    })
    .await;

    report(&label, &result)
}

/// Native click on the element the locator just marked. The page may have
/// re-rendered in between, which is a miss rather than a browser failure.
async fn click_target(session: &dyn BrowserSession, what: &str) -> Result<()> {
    session
        .click(TARGET_SELECTOR)
        .await
        .map_err(|e| LoginError::TransientUiMiss(format!("{what}: {e}")))
}

fn report(label: &str, result: &Result<()>) -> ProbeOutcome {
    let outcome = ProbeOutcome::from_result(result);
    if let Err(e) = result {
        tracing::warn!("{label}: {outcome}, skipping - {e}");
    }
    outcome
}

/// Scan the page once for an element whose whole text is `text` and click it
/// from inside the page. Returns whether anything was clicked.
pub async fn click_text_once(session: &dyn BrowserSession, text: &str) -> bool {
    match session.evaluate(&click_text_once_script(text)).await {
        Ok(value) => script::is_truthy(&value),
        Err(e) => {
            tracing::debug!(error = %e, "scan for \"{text}\" failed");
            false
        }
    }
}
