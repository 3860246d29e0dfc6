//! Miscellaneous utils
use rand::distributions::{Alphanumeric, Uniform};
use rand::{thread_rng, Rng};

use crate::constants::OTP_LENGTH;

pub(crate) mod pass;

/// Length of session keys, CSRF tokens and password reset tokens.
pub(crate) const KEY_LENGTH: usize = 32;

/// Generate a random alphanumeric key `len` characters long.
pub(crate) fn random_key(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generate a verification code of `OTP_LENGTH` uniformly random decimal digits.
pub(crate) fn generate_otp() -> String {
    thread_rng()
        .sample_iter(Uniform::new_inclusive(b'0', b'9'))
        .take(OTP_LENGTH)
        .map(char::from)
        .collect()
}

/// Emails are compared trimmed and lowercased.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Escape a value for interpolation into HTML text or attribute positions.
pub(crate) fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
