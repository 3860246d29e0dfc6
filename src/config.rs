//! Server configuration
//!
//! Every recognized option lives on [`Config`]. Values come from command-line flags, falling back
//! to environment variables (a `.env` file is loaded first by `main`), falling back to the defaults
//! below.

use chrono::Duration;
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

/// How the merged analysis result arrives at its final decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DecisionPolicyKind {
    /// Weigh the tabular predictions first, then chat sentiment.
    Signals,
    /// Always report the customer as likely to stay.
    Fixed,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "churnwatch-server", version, about = "Customer churn analysis server")]
pub struct Config {
    /// Address the HTTP server binds to.
    #[arg(long, env = "ADDR", default_value = "0.0.0.0:8000")]
    pub addr: SocketAddr,

    /// SQLite connection string.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://churnwatch.sqlite?mode=rwc")]
    pub database_url: String,

    /// Base URL used when building links sent by email.
    #[arg(long, env = "PUBLIC_URL", default_value = "http://localhost:8000")]
    pub public_url: String,

    /// Where uploaded files are stored, one sub-directory per upload.
    #[arg(long, env = "UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// Directory holding the trained churn model artifacts.
    #[arg(long, env = "MODEL_DIR", default_value = "models/output")]
    pub model_dir: PathBuf,

    /// Take the client address from the first `X-Forwarded-For` hop instead of the peer address.
    /// Only enable behind a reverse proxy that overwrites the header.
    #[arg(long, env = "TRUST_FORWARDED_FOR")]
    pub trust_forwarded_for: bool,

    /// Maximum accepted upload body size in bytes.
    #[arg(long, env = "MAX_UPLOAD_BYTES", default_value_t = 50 * 1024 * 1024)]
    pub max_upload_bytes: usize,

    /// SMTP relay host. When unset, mail is written to the log instead of sent.
    #[arg(long, env = "SMTP_HOST")]
    pub smtp_host: Option<String>,

    #[arg(long, env = "SMTP_PORT", default_value_t = 587)]
    pub smtp_port: u16,

    #[arg(long, env = "SMTP_USERNAME")]
    pub smtp_username: Option<String>,

    #[arg(long, env = "SMTP_PASSWORD", hide_env_values = true)]
    pub smtp_password: Option<String>,

    /// Sender mailbox, e.g. `Churn Prediction System <noreply@example.com>`.
    #[arg(long, env = "SMTP_EMAIL", default_value = "Churn Prediction System <noreply@localhost>")]
    pub smtp_email: String,

    /// reCAPTCHA secret. When unset, human verification is skipped.
    #[arg(long, env = "RECAPTCHA_SECRET", hide_env_values = true)]
    pub recaptcha_secret: Option<String>,

    #[arg(long, env = "SESSION_MINUTES", default_value_t = 15)]
    pub session_minutes: i64,

    #[arg(long, env = "OTP_EXPIRY_MINUTES", default_value_t = 3)]
    pub otp_expiry_minutes: i64,

    #[arg(long, env = "MAX_OTP_ATTEMPTS", default_value_t = 5)]
    pub max_otp_attempts: i64,

    #[arg(long, env = "RATE_LIMIT_WINDOW_MINUTES", default_value_t = 15)]
    pub rate_limit_window_minutes: i64,

    /// OTP requests allowed per email address within one window.
    #[arg(long, env = "MAX_OTP_REQUESTS_PER_EMAIL", default_value_t = 5)]
    pub max_otp_requests_per_email: i64,

    /// OTP requests allowed per client address within one window.
    #[arg(long, env = "MAX_OTP_REQUESTS_PER_IP", default_value_t = 10)]
    pub max_otp_requests_per_ip: i64,

    /// Verification attempts allowed per client address within one window.
    #[arg(long, env = "MAX_FAILED_VERIFICATIONS", default_value_t = 10)]
    pub max_failed_verifications: i64,

    /// Rate limit rows whose window ended longer ago than this are deleted.
    #[arg(long, env = "RATE_LIMIT_RETENTION_HOURS", default_value_t = 24)]
    pub rate_limit_retention_hours: i64,

    /// Extra delivery attempts after a failed email send.
    #[arg(long, env = "EMAIL_MAX_RETRIES", default_value_t = 2)]
    pub email_max_retries: u32,

    #[arg(long, env = "PASSWORD_EXPIRY_DAYS", default_value_t = 30)]
    pub password_expiry_days: i64,

    /// Logins within this many days of expiry get a warning.
    #[arg(long, env = "PASSWORD_WARNING_DAYS", default_value_t = 7)]
    pub password_warning_days: i64,

    #[arg(long, env = "RESET_TOKEN_MINUTES", default_value_t = 60)]
    pub reset_token_minutes: i64,

    /// Background notification workers.
    #[arg(long, env = "NOTIFY_WORKERS", default_value_t = 2)]
    pub notify_workers: usize,

    /// Pending notification jobs held before new ones are dropped.
    #[arg(long, env = "NOTIFY_QUEUE_CAPACITY", default_value_t = 64)]
    pub notify_queue_capacity: usize,

    /// Transcript participant whose lines feed the sentiment model.
    #[arg(long, env = "CHAT_PARTICIPANT", default_value = "user1")]
    pub chat_participant: String,

    #[arg(long, env = "DECISION_POLICY", value_enum, default_value_t = DecisionPolicyKind::Signals)]
    pub decision_policy: DecisionPolicyKind,

    /// Email of the administrator created when no administrator exists.
    #[arg(long, env = "ADMIN_EMAIL", default_value = "admin@example.com")]
    pub admin_email: String,

    /// Password for the bootstrap administrator. A random one is generated and logged if unset.
    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true)]
    pub admin_password: Option<String>,
}

impl Config {
    pub fn session_lifetime(&self) -> Duration {
        Duration::minutes(self.session_minutes)
    }

    pub fn otp_ttl(&self) -> Duration {
        Duration::minutes(self.otp_expiry_minutes)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::minutes(self.rate_limit_window_minutes)
    }

    pub fn rate_limit_retention(&self) -> Duration {
        Duration::hours(self.rate_limit_retention_hours)
    }

    pub fn reset_token_lifetime(&self) -> Duration {
        Duration::minutes(self.reset_token_minutes)
    }

    /// A configuration with every default applied, as if started with no flags or environment.
    pub fn defaults() -> Self {
        Self::parse_from(["churnwatch-server"])
    }
}
