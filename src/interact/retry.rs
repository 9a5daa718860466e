use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Run `action` up to `attempts` times, one after another, sleeping `delay`
/// between failures.
///
/// Returns the first success. Once every attempt has failed, the error from
/// the last attempt is returned; earlier errors are only logged.
pub async fn retry<T, E, F, Fut>(
    label: &str,
    attempts: u32,
    delay: Duration,
    mut action: F,
) -> Result<T, E>
where
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        tracing::debug!("{label}: attempt {attempt}/{attempts}");
        match action().await {
            Ok(value) => {
                tracing::debug!("{label}: success on attempt {attempt}");
                return Ok(value);
            }
            Err(e) if attempt >= attempts => {
                tracing::warn!("{label}: failed attempt {attempt} - {e}");
                return Err(e);
            }
            Err(e) => {
                tracing::debug!("{label}: failed attempt {attempt} - {e}");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
