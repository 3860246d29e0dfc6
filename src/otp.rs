//! Email verification codes for signup
//!
//! A code is requested with a name and email, mailed out, and redeemed together with the new
//! account's password. At most one code is pending per email; requesting another replaces it.

use chrono::Duration;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use entity::{OtpVerification, Role, User};

use crate::clock::Clock;
use crate::credentials::{insert_user, is_unique_violation};
use crate::notify::{Dispatcher, Job, Notifier};
use crate::utils::generate_otp;
use crate::utils::pass::{hash_password, HashError};

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("Email already registered")]
    AlreadyRegistered,

    #[error("No verification code found. Please request a new code.")]
    NotFound,

    #[error("Verification code has expired. Please request a new code.")]
    Expired,

    #[error("Too many failed attempts. Please request a new code.")]
    TooManyAttempts,

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Failed to send verification email. Please try again or contact support.")]
    Delivery,

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub struct OtpVerifier {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    notifier: Arc<Notifier>,
    dispatcher: Dispatcher,
    ttl: Duration,
    max_attempts: i64,
}

impl OtpVerifier {
    pub fn new(
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        notifier: Arc<Notifier>,
        dispatcher: Dispatcher,
        ttl: Duration,
        max_attempts: i64,
    ) -> Self {
        Self {
            pool,
            clock,
            notifier,
            dispatcher,
            ttl,
            max_attempts,
        }
    }

    async fn pending(&self, email: &str) -> Result<Option<OtpVerification>, sqlx::Error> {
        sqlx::query_as(
            "SELECT id, email, name, otp_code, created_at, expires_at, verified, attempts \
             FROM otp_verifications WHERE email = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
    }

    /// Name given with the currently pending code, if any.
    pub async fn pending_name(&self, email: &str) -> Result<Option<String>, sqlx::Error> {
        Ok(self.pending(email).await?.map(|otp| otp.name))
    }

    /// Issue a fresh code for `email` and mail it.
    ///
    /// On a failed send the code stays stored, so a resend can still be redeemed later.
    pub async fn request_code(&self, email: &str, name: &str) -> Result<(), OtpError> {
        let registered: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        if registered > 0 {
            return Err(OtpError::AlreadyRegistered);
        }

        let code = generate_otp();
        let now = self.clock.now();

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM otp_verifications WHERE email = ?")
            .bind(email)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO otp_verifications (email, name, otp_code, created_at, expires_at, verified, attempts) \
             VALUES (?, ?, ?, ?, ?, 0, 0)",
        )
        .bind(email)
        .bind(name)
        .bind(&code)
        .bind(now)
        .bind(now + self.ttl)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        if !self
            .notifier
            .send_otp(email, name, &code, self.ttl.num_minutes())
            .await
        {
            warn!(email, "Verification code stored but could not be mailed");
            return Err(OtpError::Delivery);
        }
        info!(email, "Verification code sent");
        Ok(())
    }

    /// Redeem `submitted` for `email`, creating the account on success.
    ///
    /// The account name is `name` when given, else the name the code was requested with.
    ///
    /// The attempt is counted before anything is read, inside the same write transaction that
    /// checks it, so concurrent guesses are serialized and never see a stale count.
    pub async fn verify_code(
        &self,
        email: &str,
        submitted: &str,
        name: Option<&str>,
        password: &str,
    ) -> Result<User, OtpError> {
        let now = self.clock.now();
        let mut tx = self.pool.begin().await?;

        let record: Option<OtpVerification> = sqlx::query_as(
            "UPDATE otp_verifications SET attempts = attempts + 1 \
             WHERE id = (SELECT id FROM otp_verifications WHERE email = ? ORDER BY id DESC LIMIT 1) \
             RETURNING id, email, name, otp_code, created_at, expires_at, verified, attempts",
        )
        .bind(email)
        .fetch_optional(&mut *tx)
        .await?;
        let record = record.ok_or(OtpError::NotFound)?;

        if record.is_expired(now) {
            discard(&mut tx, record.id).await?;
            tx.commit().await?;
            return Err(OtpError::Expired);
        }
        // the count includes this attempt, so going past the maximum means it was spent already
        if record.attempts > self.max_attempts {
            discard(&mut tx, record.id).await?;
            tx.commit().await?;
            return Err(OtpError::TooManyAttempts);
        }

        if record.otp_code != submitted {
            if record.has_max_attempts(self.max_attempts) {
                discard(&mut tx, record.id).await?;
                tx.commit().await?;
                warn!(email, "Verification code exhausted");
                return Err(OtpError::TooManyAttempts);
            }
            tx.commit().await?;
            return Err(OtpError::InvalidCode);
        }

        let name = match name.map(str::trim) {
            Some(n) if !n.is_empty() => n.to_string(),
            _ => record.name.clone(),
        };
        let hash = hash_password(password)?;

        let user = insert_user(&mut tx, &name, email, &hash, Role::User, now)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    OtpError::AlreadyRegistered
                } else {
                    e.into()
                }
            })?;
        sqlx::query("DELETE FROM otp_verifications WHERE email = ?")
            .bind(email)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(email, user = %user.id, "Account created after email verification");
        self.dispatcher.submit(Job::Welcome {
            email: user.email.clone(),
            name: user.name.clone(),
        });
        Ok(user)
    }

    /// Delete codes that expired more than `retention` ago.
    pub async fn prune(&self, retention: Duration) -> Result<u64, sqlx::Error> {
        let cutoff = self.clock.now() - retention;
        let removed = sqlx::query(
            "DELETE FROM otp_verifications WHERE julianday(expires_at) < julianday(?)",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if removed > 0 {
            debug!(removed, "Pruned abandoned verification codes");
        }
        Ok(removed)
    }
}

async fn discard(conn: &mut SqliteConnection, id: i64) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM otp_verifications WHERE id = ?")
        .bind(id)
        .execute(conn)
        .await?;
    Ok(())
}
