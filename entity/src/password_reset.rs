use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A single-use password reset token.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PasswordReset {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}
