//! Password-related utilities.

use lazy_static::lazy_static;
use libreauth::pass::{Algorithm, HashBuilder, Hasher};
use std::borrow::Cow;
use thiserror::Error;
use validator::ValidationError;

use crate::constants::TEMP_PASSWORD_LENGTH;
use crate::utils::random_key;

pub(crate) const PWD_ALGORITHM: Algorithm = Algorithm::Argon2;
pub(crate) const PWD_SCHEME_VERSION: usize = 1;

const MIN_PASSWORD_LENGTH: usize = 8;

// If the Hasher changes, make sure to increment PWD_SCHEME_VERSION
lazy_static! {
    pub(crate) static ref HASHER: Option<Hasher> = HashBuilder::new()
        .algorithm(PWD_ALGORITHM)
        .version(PWD_SCHEME_VERSION)
        .finalize()
        .ok();
}

#[derive(Debug, Error)]
#[error("password hashing failed: {0}")]
pub struct HashError(String);

/// Hash a plaintext password into PHC form.
pub(crate) fn hash_password(password: &str) -> Result<String, HashError> {
    let hasher = HASHER
        .as_ref()
        .ok_or_else(|| HashError("hasher could not be built".into()))?;
    hasher.hash(password).map_err(|e| HashError(format!("{:?}", e)))
}

/// Outcome of checking a plaintext password against a stored hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PasswordCheck {
    pub(crate) valid: bool,
    /// The stored hash was produced by an older scheme and should be replaced.
    pub(crate) needs_update: bool,
}

pub(crate) fn check_password(phc: &str, password: &str) -> PasswordCheck {
    match HashBuilder::from_phc(phc) {
        Ok(checker) => {
            let valid = checker.is_valid(password);
            PasswordCheck {
                valid,
                needs_update: valid && checker.needs_update(Some(PWD_SCHEME_VERSION)),
            }
        }
        Err(e) => {
            tracing::warn!("Stored password hash is unreadable: {:?}", e);
            PasswordCheck {
                valid: false,
                needs_update: false,
            }
        }
    }
}

/// Random password handed out when an administrator force-resets an account.
pub(crate) fn temporary_password() -> String {
    random_key(TEMP_PASSWORD_LENGTH)
}

/// At least eight characters, with a lowercase letter, an uppercase letter, a digit and a symbol.
pub(crate) fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    let long_enough = password.chars().count() >= MIN_PASSWORD_LENGTH;
    let has_lower = password.chars().any(|c| c.is_lowercase());
    let has_upper = password.chars().any(|c| c.is_uppercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password
        .chars()
        .any(|c| !c.is_alphanumeric() && c != '_' && !c.is_whitespace());

    if long_enough && has_lower && has_upper && has_digit && has_symbol {
        Ok(())
    } else {
        let mut err = ValidationError::new("password_strength");
        err.message = Some(Cow::from(
            "Password must be at least 8 characters and contain an uppercase letter, a lowercase letter, a number and a symbol.",
        ));
        Err(err)
    }
}
