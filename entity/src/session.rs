use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A logged-in session, keyed by the value of the session cookie.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub key: String,
    pub user_id: Uuid,
    pub csrf_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}
