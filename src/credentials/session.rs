use chrono::Duration;
use uuid::Uuid;

use entity::{Session, User};

use super::CredentialStore;
use crate::utils::{random_key, KEY_LENGTH};

impl CredentialStore {
    /// Start a session for `user_id`, with a fresh CSRF token.
    pub async fn create_session(
        &self,
        user_id: Uuid,
        lifetime: Duration,
    ) -> Result<Session, sqlx::Error> {
        let now = self.clock.now();
        let session = Session {
            key: random_key(KEY_LENGTH),
            user_id,
            csrf_token: random_key(KEY_LENGTH),
            created_at: now,
            expires_at: now + lifetime,
        };

        sqlx::query(
            "INSERT INTO sessions (key, user_id, csrf_token, created_at, expires_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&session.key)
        .bind(session.user_id)
        .bind(&session.csrf_token)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;

        Ok(session)
    }

    /// Look up a live session and its user, pushing its expiry `lifetime` into the future.
    ///
    /// Expired sessions are deleted on sight.
    pub async fn resolve_session(
        &self,
        key: &str,
        lifetime: Duration,
    ) -> Result<Option<(Session, User)>, sqlx::Error> {
        let now = self.clock.now();
        let session: Option<Session> = sqlx::query_as(
            "SELECT key, user_id, csrf_token, created_at, expires_at FROM sessions WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let Some(mut session) = session else {
            return Ok(None);
        };
        if now > session.expires_at {
            self.end_session(key).await?;
            return Ok(None);
        }
        let Some(user) = self.find_by_id(session.user_id).await? else {
            self.end_session(key).await?;
            return Ok(None);
        };

        session.expires_at = now + lifetime;
        sqlx::query("UPDATE sessions SET expires_at = ? WHERE key = ?")
            .bind(session.expires_at)
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(Some((session, user)))
    }

    /// Delete sessions that have run out.
    pub async fn prune_sessions(&self) -> Result<u64, sqlx::Error> {
        Ok(
            sqlx::query("DELETE FROM sessions WHERE julianday(expires_at) < julianday(?)")
                .bind(self.clock.now())
                .execute(&self.pool)
                .await?
                .rows_affected(),
        )
    }

    pub async fn end_session(&self, key: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM sessions WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
