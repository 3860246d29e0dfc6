use chrono::{DateTime, Utc};

/// Attempt counter for one `(key, action)` pair.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct RateLimit {
    pub key: String,
    pub action: String,
    pub attempts: i64,
    pub reset_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RateLimit {
    pub fn is_reset_time(&self, now: DateTime<Utc>) -> bool {
        now > self.reset_at
    }
}
