//! Human verification of form submissions

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{error, warn};

const RECAPTCHA_VERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";

#[async_trait]
pub trait HumanVerifier: Send + Sync {
    /// Whether `response` proves a human submitted the form.
    async fn verify(&self, response: &str, remote_ip: Option<&str>) -> bool;
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

/// Google reCAPTCHA v2 verification.
pub struct Recaptcha {
    client: reqwest::Client,
    secret: String,
}

impl Recaptcha {
    pub fn new(secret: String) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, secret })
    }
}

#[async_trait]
impl HumanVerifier for Recaptcha {
    async fn verify(&self, response: &str, remote_ip: Option<&str>) -> bool {
        if response.is_empty() {
            return false;
        }
        let mut form = vec![("secret", self.secret.as_str()), ("response", response)];
        if let Some(ip) = remote_ip {
            form.push(("remoteip", ip));
        }

        let reply = match self.client.post(RECAPTCHA_VERIFY_URL).form(&form).send().await {
            Ok(reply) => reply,
            Err(e) => {
                error!("reCAPTCHA request failed: {}", e);
                return false;
            }
        };
        match reply.json::<SiteVerifyResponse>().await {
            Ok(body) => {
                if !body.success {
                    warn!(errors = ?body.error_codes, "reCAPTCHA rejected a submission");
                }
                body.success
            }
            Err(e) => {
                error!("reCAPTCHA response unreadable: {}", e);
                false
            }
        }
    }
}

/// Accepts everything. Used when no reCAPTCHA secret is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoVerification;

#[async_trait]
impl HumanVerifier for NoVerification {
    async fn verify(&self, _response: &str, _remote_ip: Option<&str>) -> bool {
        true
    }
}
