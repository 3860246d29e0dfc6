//! Persisted row models
//!
//! Note that these have to be kept in step with the schema in `churnwatch::db` by hand.

pub mod otp_verification;
pub mod password_reset;
pub mod rate_limit;
pub mod role;
pub mod session;
pub mod user;

pub use otp_verification::OtpVerification;
pub use password_reset::PasswordReset;
pub use rate_limit::RateLimit;
pub use role::{Role, RoleRow};
pub use session::Session;
pub use user::User;
