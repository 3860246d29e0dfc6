use chrono::{DateTime, Utc};

/// A pending signup verification code. At most one exists per email.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OtpVerification {
    pub id: i64,
    pub email: String,
    /// Name given when the code was requested
    pub name: String,
    pub otp_code: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub verified: bool,
    pub attempts: i64,
}

impl OtpVerification {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn has_max_attempts(&self, max_attempts: i64) -> bool {
        self.attempts >= max_attempts
    }
}
