use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::{Mailer, NotifyError, OutgoingMail};

/// Keeps every delivered message in memory.
///
/// Can be told to fail a number of deliveries first, or to always refuse some recipients.
#[derive(Debug, Clone, Default)]
pub struct MemoryMailer {
    sent: Arc<Mutex<Vec<OutgoingMail>>>,
    failures_left: Arc<AtomicUsize>,
    attempts: Arc<AtomicUsize>,
    rejected: Arc<Mutex<HashSet<String>>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `failures` deliveries.
    pub fn failing(failures: usize) -> Self {
        let mailer = Self::default();
        mailer.failures_left.store(failures, Ordering::SeqCst);
        mailer
    }

    /// Refuse every delivery to `recipient` from now on.
    pub fn reject(&self, recipient: &str) {
        self.rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(recipient.to_string());
    }

    pub fn sent(&self) -> Vec<OutgoingMail> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<OutgoingMail> {
        self.sent()
            .into_iter()
            .filter(|mail| mail.to == recipient)
            .collect()
    }

    /// Deliveries tried so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn deliver(&self, mail: &OutgoingMail) -> Result<(), NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .rejected
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&mail.to);
        if refused {
            return Err(NotifyError::Rejected(format!("mailbox {} unavailable", mail.to)));
        }
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(NotifyError::Rejected("simulated failure".into()));
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(mail.clone());
        Ok(())
    }
}
