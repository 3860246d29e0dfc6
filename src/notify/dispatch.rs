//! Background delivery of notifications
//!
//! Jobs go through a bounded queue to a fixed pool of workers. A full queue drops the job with a
//! warning instead of stalling the request that produced it.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use super::Notifier;
use crate::credentials::CredentialStore;
use crate::inference::AnalysisResult;

#[derive(Debug, Clone)]
pub enum Job {
    Welcome {
        email: String,
        name: String,
    },
    PasswordChanged {
        email: String,
        name: String,
        by_admin: bool,
    },
    ResetLink {
        email: String,
        name: String,
        link: String,
        valid_minutes: i64,
    },
    /// Sent to every administrator, or to `requested_by` when there are none.
    ResultReport {
        result: Box<AnalysisResult>,
        requested_by: String,
    },
}

impl Job {
    fn kind(&self) -> &'static str {
        match self {
            Job::Welcome { .. } => "welcome",
            Job::PasswordChanged { .. } => "password_changed",
            Job::ResetLink { .. } => "reset_link",
            Job::ResultReport { .. } => "result_report",
        }
    }
}

#[derive(Clone)]
struct JobContext {
    notifier: Arc<Notifier>,
    credentials: CredentialStore,
}

/// Handle for submitting jobs. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<Job>,
}

impl Dispatcher {
    /// Spawn `workers` workers sharing a queue of `capacity` jobs.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        workers: usize,
        capacity: usize,
        notifier: Arc<Notifier>,
        credentials: CredentialStore,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let context = JobContext {
            notifier,
            credentials,
        };

        for worker in 0..workers.max(1) {
            tokio::spawn(work(worker, rx.clone(), context.clone()));
        }
        Self { tx }
    }

    /// Queue a job, returning whether it was accepted.
    pub fn submit(&self, job: Job) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(job = job.kind(), "Notification queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                error!(job = job.kind(), "Notification workers are gone, dropping job");
                false
            }
        }
    }
}

async fn work(worker: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>, context: JobContext) {
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };
        let kind = job.kind();

        // a panicking job must not take the worker down with it
        if let Err(e) = tokio::spawn(run(job, context.clone())).await {
            error!(worker, job = kind, "Notification job panicked: {}", e);
        }
    }
    info!(worker, "Notification worker stopped");
}

async fn run(job: Job, context: JobContext) {
    let notifier = &context.notifier;
    match job {
        Job::Welcome { email, name } => {
            notifier.send_welcome(&email, &name).await;
        }
        Job::PasswordChanged {
            email,
            name,
            by_admin,
        } => {
            notifier.send_password_changed(&email, &name, by_admin).await;
        }
        Job::ResetLink {
            email,
            name,
            link,
            valid_minutes,
        } => {
            notifier
                .send_reset_link(&email, &name, &link, valid_minutes)
                .await;
        }
        Job::ResultReport {
            result,
            requested_by,
        } => {
            let recipients = match context.credentials.admin_emails().await {
                Ok(admins) if !admins.is_empty() => admins,
                Ok(_) => vec![requested_by],
                Err(e) => {
                    error!("Could not look up administrators for the report: {}", e);
                    vec![requested_by]
                }
            };
            let delivered = notifier.send_result_report(&recipients, &result).await;
            info!(
                delivered,
                recipients = recipients.len(),
                "Analysis report dispatched"
            );
        }
    }
}
