//! Outbound email
//!
//! A [`Mailer`] moves one message; [`Notifier`] adds retries and the message templates on top.
//! Anything that should not hold up a request goes through the [`dispatch::Dispatcher`].

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::inference::AnalysisResult;

pub mod dispatch;
pub mod memory;
pub mod smtp;
pub(crate) mod templates;

pub use dispatch::{Dispatcher, Job};
pub use memory::MemoryMailer;
pub use smtp::{LogMailer, SmtpMailer};

/// A rendered HTML email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid mailbox {0:?}")]
    Address(String),

    #[error(transparent)]
    Build(#[from] lettre::error::Error),

    #[error(transparent)]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("delivery rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, mail: &OutgoingMail) -> Result<(), NotifyError>;
}

pub struct Notifier {
    mailer: Arc<dyn Mailer>,
    max_retries: u32,
    retry_delay: Duration,
}

impl Notifier {
    pub fn new(mailer: Arc<dyn Mailer>, max_retries: u32) -> Self {
        Self {
            mailer,
            max_retries,
            retry_delay: Duration::from_millis(500),
        }
    }

    /// Pause between failed attempts; zero in tests.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Send one HTML email, trying up to `1 + max_retries` times.
    ///
    /// Returns whether any attempt succeeded. Failures are logged, never raised.
    pub async fn send(&self, subject: &str, recipient: &str, html: String, max_retries: u32) -> bool {
        let mail = OutgoingMail {
            to: recipient.to_string(),
            subject: subject.to_string(),
            html,
        };

        for attempt in 0..=max_retries {
            match self.mailer.deliver(&mail).await {
                Ok(()) => {
                    info!(to = recipient, subject, "Email sent");
                    return true;
                }
                Err(e) => {
                    warn!(
                        to = recipient,
                        attempt = attempt + 1,
                        "Email delivery failed: {}",
                        e
                    );
                    if attempt < max_retries && !self.retry_delay.is_zero() {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }
        false
    }

    async fn send_default(&self, subject: &str, recipient: &str, html: String) -> bool {
        self.send(subject, recipient, html, self.max_retries).await
    }

    pub async fn send_otp(&self, email: &str, name: &str, otp: &str, ttl_minutes: i64) -> bool {
        let (subject, html) = templates::otp(name, otp, ttl_minutes);
        self.send_default(&subject, email, html).await
    }

    pub async fn send_welcome(&self, email: &str, name: &str) -> bool {
        let (subject, html) = templates::welcome(name);
        self.send_default(&subject, email, html).await
    }

    pub async fn send_password_changed(&self, email: &str, name: &str, by_admin: bool) -> bool {
        let (subject, html) = templates::password_changed(name, by_admin);
        self.send_default(&subject, email, html).await
    }

    pub async fn send_reset_link(
        &self,
        email: &str,
        name: &str,
        link: &str,
        valid_minutes: i64,
    ) -> bool {
        let (subject, html) = templates::reset_link(name, link, valid_minutes);
        self.send_default(&subject, email, html).await
    }

    /// Send an analysis report to each recipient independently.
    ///
    /// Returns how many were delivered.
    pub async fn send_result_report(&self, recipients: &[String], result: &AnalysisResult) -> usize {
        let (subject, html) = templates::result_report(result);
        let mut delivered = 0;
        for recipient in recipients {
            if self.send_default(&subject, recipient, html.clone()).await {
                delivered += 1;
            }
        }
        delivered
    }
}
