//! User accounts, roles and the administrator operations on them.
//!
//! Sessions and password reset tokens live in the submodules; both belong to a user row and are
//! removed with it.

use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use entity::{Role, User};

use crate::clock::Clock;
use crate::utils::pass::{check_password, hash_password, temporary_password, HashError};

mod reset;
mod session;

/// Every user query selects these columns, with the role name joined in.
const USER_SELECT: &str = "SELECT u.id, u.name, u.email, u.password, r.name AS role, \
    u.created_at, u.last_password_change FROM users u JOIN roles r ON r.id = u.role_id";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("User with ID {0} not found")]
    NotFound(Uuid),

    #[error("Email is already in use by another user")]
    EmailTaken,

    #[error("{0}")]
    LastAdmin(&'static str),

    #[error("{0}")]
    SelfAction(&'static str),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid or expired reset link. Please try again.")]
    InvalidResetToken,

    #[error("New password cannot be the same as your old password")]
    SamePassword,

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Changes an administrator may make to an account.
#[derive(Debug, Clone)]
pub struct UserChanges {
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Clone)]
pub struct CredentialStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Insert a user on an existing connection, so callers can make it part of a larger transaction.
pub(crate) async fn insert_user(
    conn: &mut SqliteConnection,
    name: &str,
    email: &str,
    password_hash: &str,
    role: Role,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<User, sqlx::Error> {
    let id = Uuid::from(ulid::Ulid::new());
    sqlx::query(
        "INSERT INTO users (id, name, email, password, role_id, created_at, last_password_change) \
         VALUES (?, ?, ?, ?, (SELECT id FROM roles WHERE name = ?), ?, ?)",
    )
    .bind(id)
    .bind(name)
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as::<_, User>(&format!("{} WHERE u.id = ?", USER_SELECT))
        .bind(id)
        .fetch_one(&mut *conn)
        .await
}

async fn fetch_user(conn: &mut SqliteConnection, id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("{} WHERE u.id = ?", USER_SELECT))
        .bind(id)
        .fetch_optional(conn)
        .await
}

/// Administrators other than `excluding`.
async fn other_admin_count(conn: &mut SqliteConnection, excluding: Uuid) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM users u JOIN roles r ON r.id = u.role_id \
         WHERE r.name = ? AND u.id != ?",
    )
    .bind(Role::Admin)
    .bind(excluding)
    .fetch_one(conn)
    .await
}

impl CredentialStore {
    pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("{} WHERE u.email = ?", USER_SELECT))
            .bind(email)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        fetch_user(&mut conn, id).await
    }

    pub async fn email_exists(&self, email: &str) -> Result<bool, sqlx::Error> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    pub async fn list_users(&self) -> Result<Vec<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(&format!("{} ORDER BY u.created_at, u.email", USER_SELECT))
            .fetch_all(&self.pool)
            .await
    }

    pub async fn admin_emails(&self) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT u.email FROM users u JOIN roles r ON r.id = u.role_id \
             WHERE r.name = ? ORDER BY u.email",
        )
        .bind(Role::Admin)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<User, CredentialError> {
        let hash = hash_password(password)?;
        let mut conn = self.pool.acquire().await?;
        insert_user(&mut conn, name, email, &hash, role, self.clock.now())
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    CredentialError::EmailTaken
                } else {
                    e.into()
                }
            })
    }

    /// Check an email and password pair.
    ///
    /// Hashes made by an older scheme are transparently replaced on success.
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<User, CredentialError> {
        let user = self
            .find_by_email(email)
            .await?
            .ok_or(CredentialError::InvalidCredentials)?;

        let check = check_password(&user.password, password);
        if !check.valid {
            return Err(CredentialError::InvalidCredentials);
        }
        if check.needs_update {
            match hash_password(password) {
                Ok(hash) => {
                    sqlx::query("UPDATE users SET password = ? WHERE id = ?")
                        .bind(hash)
                        .bind(user.id)
                        .execute(&self.pool)
                        .await?;
                }
                Err(e) => warn!("Could not rehash password for {}: {}", user.id, e),
            }
        }
        Ok(user)
    }

    /// Replace a user's password and restart its expiry period.
    pub async fn set_password(&self, user_id: Uuid, password: &str) -> Result<(), CredentialError> {
        let hash = hash_password(password)?;
        let updated = sqlx::query(
            "UPDATE users SET password = ?, last_password_change = ? WHERE id = ?",
        )
        .bind(hash)
        .bind(self.clock.now())
        .bind(user_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 0 {
            return Err(CredentialError::NotFound(user_id));
        }
        Ok(())
    }

    /// Update an account's name, email and role.
    ///
    /// The last remaining administrator cannot be demoted.
    pub async fn update_user(
        &self,
        user_id: Uuid,
        changes: &UserChanges,
    ) -> Result<User, CredentialError> {
        let mut tx = self.pool.begin().await?;

        let user = fetch_user(&mut tx, user_id)
            .await?
            .ok_or(CredentialError::NotFound(user_id))?;

        let taken: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ? AND id != ?")
            .bind(&changes.email)
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;
        if taken > 0 {
            return Err(CredentialError::EmailTaken);
        }

        if user.is_admin()
            && changes.role != Role::Admin
            && other_admin_count(&mut tx, user_id).await? == 0
        {
            return Err(CredentialError::LastAdmin(
                "Cannot change role: this is the last admin user",
            ));
        }

        sqlx::query(
            "UPDATE users SET name = ?, email = ?, role_id = (SELECT id FROM roles WHERE name = ?) \
             WHERE id = ?",
        )
        .bind(&changes.name)
        .bind(&changes.email)
        .bind(changes.role)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let updated = fetch_user(&mut tx, user_id)
            .await?
            .ok_or(CredentialError::NotFound(user_id))?;
        tx.commit().await?;

        info!(user = %user_id, role = %updated.role, "Updated user");
        Ok(updated)
    }

    /// Delete an account on behalf of `acting`.
    pub async fn delete_user(&self, acting: Uuid, user_id: Uuid) -> Result<User, CredentialError> {
        if acting == user_id {
            return Err(CredentialError::SelfAction("You cannot delete your own account"));
        }

        let mut tx = self.pool.begin().await?;
        let user = fetch_user(&mut tx, user_id)
            .await?
            .ok_or(CredentialError::NotFound(user_id))?;

        if user.is_admin() && other_admin_count(&mut tx, user_id).await? == 0 {
            return Err(CredentialError::LastAdmin("Cannot delete the last admin user"));
        }

        sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(user = %user_id, by = %acting, "Deleted user");
        Ok(user)
    }

    /// Give an account a fresh temporary password and end its sessions.
    ///
    /// Returns the user and the plaintext temporary password.
    pub async fn reset_password_by_admin(
        &self,
        acting: Uuid,
        user_id: Uuid,
    ) -> Result<(User, String), CredentialError> {
        if acting == user_id {
            return Err(CredentialError::SelfAction(
                "You cannot reset your own password. Use the change password feature instead.",
            ));
        }

        let temp = temporary_password();
        let hash = hash_password(&temp)?;

        let mut tx = self.pool.begin().await?;
        let user = fetch_user(&mut tx, user_id)
            .await?
            .ok_or(CredentialError::NotFound(user_id))?;
        sqlx::query("UPDATE users SET password = ?, last_password_change = ? WHERE id = ?")
            .bind(hash)
            .bind(self.clock.now())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sessions WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(user = %user_id, by = %acting, "Password reset by admin");
        Ok((user, temp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    async fn store() -> CredentialStore {
        let pool = crate::db::init("sqlite::memory:").await.unwrap();
        CredentialStore::new(pool, Arc::new(ManualClock::default()))
    }

    #[tokio::test]
    async fn authenticates_with_the_right_password_only() {
        let store = store().await;
        store
            .create_user("Ada", "ada@example.com", "Sup3r$ecret", Role::User)
            .await
            .unwrap();

        let user = store.authenticate("ada@example.com", "Sup3r$ecret").await.unwrap();
        assert_eq!(user.name, "Ada");
        assert_eq!(user.role, Role::User);
        assert!(matches!(
            store.authenticate("ada@example.com", "wrong-Passw0rd").await,
            Err(CredentialError::InvalidCredentials)
        ));
        assert!(matches!(
            store.authenticate("nobody@example.com", "Sup3r$ecret").await,
            Err(CredentialError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let store = store().await;
        store
            .create_user("Ada", "ada@example.com", "Sup3r$ecret", Role::User)
            .await
            .unwrap();
        assert!(matches!(
            store
                .create_user("Other", "ada@example.com", "Sup3r$ecret", Role::User)
                .await,
            Err(CredentialError::EmailTaken)
        ));
    }

    #[tokio::test]
    async fn last_admin_is_protected() {
        let store = store().await;
        let admin = store
            .create_user("Root", "root@example.com", "Sup3r$ecret", Role::Admin)
            .await
            .unwrap();
        let user = store
            .create_user("Ada", "ada@example.com", "Sup3r$ecret", Role::User)
            .await
            .unwrap();

        let demote = UserChanges {
            name: admin.name.clone(),
            email: admin.email.clone(),
            role: Role::User,
        };
        assert!(matches!(
            store.update_user(admin.id, &demote).await,
            Err(CredentialError::LastAdmin(_))
        ));
        assert!(matches!(
            store.delete_user(user.id, admin.id).await,
            Err(CredentialError::LastAdmin(_))
        ));

        let promote = UserChanges {
            name: user.name.clone(),
            email: user.email.clone(),
            role: Role::Admin,
        };
        store.update_user(user.id, &promote).await.unwrap();
        let demoted = store.update_user(admin.id, &demote).await.unwrap();
        assert_eq!(demoted.role, Role::User);
    }

    #[tokio::test]
    async fn admin_cannot_target_itself() {
        let store = store().await;
        let admin = store
            .create_user("Root", "root@example.com", "Sup3r$ecret", Role::Admin)
            .await
            .unwrap();

        assert!(matches!(
            store.delete_user(admin.id, admin.id).await,
            Err(CredentialError::SelfAction(_))
        ));
        assert!(matches!(
            store.reset_password_by_admin(admin.id, admin.id).await,
            Err(CredentialError::SelfAction(_))
        ));
    }

    #[tokio::test]
    async fn admin_reset_issues_a_working_temporary_password() {
        let store = store().await;
        let admin = store
            .create_user("Root", "root@example.com", "Sup3r$ecret", Role::Admin)
            .await
            .unwrap();
        let user = store
            .create_user("Ada", "ada@example.com", "Sup3r$ecret", Role::User)
            .await
            .unwrap();

        let (_, temp) = store.reset_password_by_admin(admin.id, user.id).await.unwrap();
        assert_eq!(temp.len(), 12);
        assert!(store.authenticate("ada@example.com", &temp).await.is_ok());
        assert!(store.authenticate("ada@example.com", "Sup3r$ecret").await.is_err());
    }
}
