//! Database initialization
//!
//! The schema is created idempotently on every start, then the fixed roles are seeded and an
//! administrator is bootstrapped if none exists.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use entity::Role;

use crate::credentials::{CredentialError, CredentialStore};
use crate::utils::random_key;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS roles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS users (
        id BLOB PRIMARY KEY NOT NULL,
        name TEXT NOT NULL,
        email TEXT NOT NULL UNIQUE,
        password TEXT NOT NULL,
        role_id INTEGER NOT NULL REFERENCES roles(id),
        created_at TEXT NOT NULL,
        last_password_change TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS otp_verifications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        email TEXT NOT NULL,
        name TEXT NOT NULL,
        otp_code TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        verified INTEGER NOT NULL DEFAULT 0,
        attempts INTEGER NOT NULL DEFAULT 0
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_otp_verifications_email ON otp_verifications(email)",
    r#"CREATE TABLE IF NOT EXISTS rate_limits (
        key TEXT NOT NULL,
        action TEXT NOT NULL,
        attempts INTEGER NOT NULL DEFAULT 0,
        reset_at TEXT NOT NULL,
        created_at TEXT NOT NULL,
        PRIMARY KEY (key, action)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS sessions (
        key TEXT PRIMARY KEY NOT NULL,
        user_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        csrf_token TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS password_resets (
        token TEXT PRIMARY KEY NOT NULL,
        user_id BLOB NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        expires_at TEXT NOT NULL
    )"#,
];

/// Open a connection pool for `url`.
///
/// In-memory databases live only as long as their connection, so they get exactly one
/// connection that is never recycled.
pub async fn connect(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = if url.contains(":memory:") {
        SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?
    } else {
        SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?
    };
    Ok(pool)
}

/// Create every table that does not exist yet and seed the fixed roles.
pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    for role in Role::ALL {
        let inserted = sqlx::query("INSERT INTO roles (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
            .bind(role)
            .execute(pool)
            .await?
            .rows_affected();
        if inserted > 0 {
            info!("Created {} role", role);
        }
    }
    Ok(())
}

/// Connect and migrate in one step.
pub async fn init(url: &str) -> Result<SqlitePool, sqlx::Error> {
    let pool = connect(url).await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Create an administrator when none exists.
///
/// Returns the generated password when one had to be made up, so the caller can report it once.
pub async fn bootstrap_admin(
    store: &CredentialStore,
    email: &str,
    password: Option<&str>,
) -> Result<Option<String>, CredentialError> {
    if !store.admin_emails().await?.is_empty() {
        return Ok(None);
    }

    let (password, generated) = match password {
        Some(p) => (p.to_string(), false),
        None => (random_key(16), true),
    };
    store.create_user("Admin", email, &password, Role::Admin).await?;
    info!(email, "Created default admin user");
    if generated {
        warn!("ADMIN_PASSWORD is not set; the bootstrap admin was given a generated password");
        Ok(Some(password))
    } else {
        Ok(None)
    }
}
