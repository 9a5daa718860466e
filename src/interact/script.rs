//! Envelope for in-page scripts.
//!
//! Every script sent through [`BrowserSession::evaluate`] is an immediately
//! invoked function taking a single JSON argument, prefixed with a comment
//! naming it:
//!
//! ```text
//! /*fbsession:find-by-text {"text":"log in","exact":true}*/
//! (function(args){ ... })({"text":"log in","exact":true})
//! ```
//!
//! The header makes scripts identifiable in debug logs and lets test doubles
//! answer them without interpreting JavaScript.
//!
//! [`BrowserSession::evaluate`]: crate::browser::BrowserSession::evaluate

use serde::Serialize;
use serde_json::Value;

const PREFIX: &str = "/*fbsession:";

/// Build an enveloped script from a function body and its argument.
pub fn build(tag: &str, body: &str, args: &impl Serialize) -> String {
    let json = serde_json::to_string(args).unwrap_or_else(|_| "null".to_string());
    // "\/" is a valid JSON escape, so the header can never close the comment early.
    let header = json.replace("*/", "*\\/");
    format!("{PREFIX}{tag} {header}*/\n(function(args){{{body}}})({json})")
}

/// Split an enveloped script back into its tag and argument.
pub fn parse(script: &str) -> Option<(&str, Value)> {
    let rest = script.strip_prefix(PREFIX)?;
    let (header, _) = rest.split_once("*/")?;
    let (tag, json) = header.split_once(' ')?;
    let args = serde_json::from_str(json).ok()?;
    Some((tag, args))
}

/// JavaScript truthiness of an evaluation result.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
