//! Constants

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Loose email shape check, applied before anything touches storage.
    pub(crate) static ref RE_EMAIL: Regex = Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap();
    pub(crate) static ref RE_OTP: Regex = Regex::new(r"^[0-9]{6}$").unwrap();
}

// for authorized sessions
pub const SESSION_COOKIE_NAME: &str = "chsessid";
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";

// rate limited actions
pub(crate) const ACTION_REQUEST_OTP_IP: &str = "request_otp_ip";
pub(crate) const ACTION_REQUEST_OTP_EMAIL: &str = "request_otp_email";
pub(crate) const ACTION_VERIFY_OTP: &str = "verify_otp";
pub(crate) const ACTION_FORGOT_PASSWORD: &str = "forgot_password";
pub(crate) const EMAIL_KEY_PREFIX: &str = "email:";

pub(crate) const OTP_LENGTH: usize = 6;
pub(crate) const TEMP_PASSWORD_LENGTH: usize = 12;

pub(crate) const APP_NAME: &str = "Churn Prediction System";
