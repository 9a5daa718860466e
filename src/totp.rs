//! Time-based one-time passwords (RFC 6238, HMAC-SHA1).

use std::sync::Arc;

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::clock::{Clock, SystemClock};
use crate::error::{LoginError, Result};

type HmacSha1 = Hmac<Sha1>;

/// Produces the current one-time code for a shared secret.
pub trait OtpGenerator: Send + Sync {
    fn generate(&self, secret: &str) -> Result<String>;
}

const MIN_DIGITS: u32 = 6;
const MAX_DIGITS: u32 = 8;

/// Standard authenticator-app codes: 30 second steps, 6 digits.
#[derive(Clone)]
pub struct TotpGenerator {
    clock: Arc<dyn Clock>,
    step: u64,
    digits: u32,
}

impl TotpGenerator {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            step: 30,
            digits: 6,
        }
    }

    /// Code length, clamped to the 6 to 8 digits authenticator apps accept.
    pub fn with_digits(mut self, digits: u32) -> Self {
        self.digits = digits.clamp(MIN_DIGITS, MAX_DIGITS);
        self
    }

    /// Code for the time step containing `unix_seconds`.
    pub fn code_at(&self, secret: &str, unix_seconds: u64) -> Result<String> {
        let key = decode_secret(secret)?;
        let counter = unix_seconds / self.step;

        let mut mac = HmacSha1::new_from_slice(&key)
            .map_err(|e| LoginError::InvalidTwoFactorSecret(e.to_string()))?;
        mac.update(&counter.to_be_bytes());
        let digest = mac.finalize().into_bytes();

        let offset = (digest[digest.len() - 1] & 0x0f) as usize;
        let binary = u32::from_be_bytes([
            digest[offset] & 0x7f,
            digest[offset + 1],
            digest[offset + 2],
            digest[offset + 3],
        ]);
        let code = binary % 10u32.pow(self.digits);
        Ok(format!("{code:0width$}", width = self.digits as usize))
    }
}

impl Default for TotpGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl OtpGenerator for TotpGenerator {
    fn generate(&self, secret: &str) -> Result<String> {
        self.code_at(secret, self.clock.unix_seconds())
    }
}

/// Secrets are commonly shown grouped with spaces, lowercase, or padded.
fn decode_secret(secret: &str) -> Result<Vec<u8>> {
    let cleaned: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=' && *c != '-')
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if cleaned.is_empty() {
        return Err(LoginError::InvalidTwoFactorSecret("secret is empty".to_string()));
    }
    base32::decode(base32::Alphabet::Rfc4648 { padding: false }, &cleaned)
        .ok_or_else(|| LoginError::InvalidTwoFactorSecret("not valid base32".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    // "12345678901234567890" in base32, the RFC 6238 SHA1 test key.
    const RFC_SECRET: &str = "GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ";

    #[test]
    fn matches_rfc_6238_vectors() {
        let totp = TotpGenerator::new().with_digits(8);
        assert_eq!(totp.code_at(RFC_SECRET, 59).unwrap(), "94287082");
        assert_eq!(totp.code_at(RFC_SECRET, 1111111109).unwrap(), "07081804");
        assert_eq!(totp.code_at(RFC_SECRET, 1234567890).unwrap(), "89005924");
        assert_eq!(totp.code_at(RFC_SECRET, 2000000000).unwrap(), "69279037");
    }

    #[test]
    fn six_digit_codes_keep_leading_zeros() {
        let totp = TotpGenerator::with_clock(Arc::new(FixedClock::at_unix(1111111109)));
        assert_eq!(totp.generate(RFC_SECRET).unwrap(), "081804");
    }

    #[test]
    fn out_of_range_digit_counts_are_clamped() {
        let long = TotpGenerator::new().with_digits(10);
        assert_eq!(long.code_at(RFC_SECRET, 59).unwrap(), "94287082");

        let short = TotpGenerator::new().with_digits(0);
        assert_eq!(short.code_at(RFC_SECRET, 1111111109).unwrap(), "081804");
    }

    #[test]
    fn accepts_grouped_lowercase_secrets() {
        let totp = TotpGenerator::with_clock(Arc::new(FixedClock::at_unix(59)));
        let grouped = "gezd gnbv gy3t qojq gezd gnbv gy3t qojq";
        assert_eq!(totp.generate(grouped).unwrap(), "287082");
    }

    #[test]
    fn rejects_invalid_secrets() {
        let totp = TotpGenerator::new();
        assert!(matches!(
            totp.generate("   "),
            Err(LoginError::InvalidTwoFactorSecret(_))
        ));
        assert!(matches!(
            totp.generate("not base32!"),
            Err(LoginError::InvalidTwoFactorSecret(_))
        ));
    }
}
