use chrono::Duration;
use uuid::Uuid;

use entity::{PasswordReset, User};

use super::{fetch_user, CredentialError, CredentialStore};
use crate::utils::pass::{check_password, hash_password};
use crate::utils::{random_key, KEY_LENGTH};

impl CredentialStore {
    /// Issue a single-use reset token for `user_id`, valid for `lifetime`.
    pub async fn issue_reset_token(
        &self,
        user_id: Uuid,
        lifetime: Duration,
    ) -> Result<String, sqlx::Error> {
        let token = random_key(KEY_LENGTH);
        sqlx::query("INSERT INTO password_resets (token, user_id, expires_at) VALUES (?, ?, ?)")
            .bind(&token)
            .bind(user_id)
            .bind(self.clock.now() + lifetime)
            .execute(&self.pool)
            .await?;
        Ok(token)
    }

    /// The user a live reset token belongs to.
    pub async fn reset_token_user(&self, token: &str) -> Result<Option<User>, sqlx::Error> {
        let reset: Option<PasswordReset> =
            sqlx::query_as("SELECT token, user_id, expires_at FROM password_resets WHERE token = ?")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;

        match reset {
            Some(reset) if self.clock.now() <= reset.expires_at => {
                self.find_by_id(reset.user_id).await
            }
            _ => Ok(None),
        }
    }

    /// Set a new password through a reset token.
    ///
    /// The token is consumed in the same transaction that changes the password, so it can win at
    /// most once. Every other outstanding token and session of the user is discarded.
    pub async fn reset_password_with_token(
        &self,
        token: &str,
        password: &str,
    ) -> Result<User, CredentialError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let user_id: Option<Uuid> = sqlx::query_scalar(
            "DELETE FROM password_resets WHERE token = ? AND julianday(expires_at) >= julianday(?) \
             RETURNING user_id",
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?;
        let user_id = user_id.ok_or(CredentialError::InvalidResetToken)?;
        let user = fetch_user(&mut tx, user_id)
            .await?
            .ok_or(CredentialError::InvalidResetToken)?;

        // returning early rolls back, leaving the token usable
        if check_password(&user.password, password).valid {
            return Err(CredentialError::SamePassword);
        }
        let hash = hash_password(password)?;

        sqlx::query("UPDATE users SET password = ?, last_password_change = ? WHERE id = ?")
            .bind(hash)
            .bind(now)
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM password_resets WHERE user_id = ?")
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(user)
    }

    /// Delete reset tokens that can no longer be used.
    pub async fn prune_reset_tokens(&self) -> Result<u64, sqlx::Error> {
        Ok(
            sqlx::query("DELETE FROM password_resets WHERE julianday(expires_at) < julianday(?)")
                .bind(self.clock.now())
                .execute(&self.pool)
                .await?
                .rows_affected(),
        )
    }
}
