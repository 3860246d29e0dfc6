//! Shared setup for the integration tests.
#![allow(dead_code)]

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Duration;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`

use churnwatch::{
    captcha::NoVerification,
    clock::{Clock, ManualClock},
    config::Config,
    constants::{CSRF_HEADER_NAME, SESSION_COOKIE_NAME},
    db,
    inference::Pipeline,
    notify::{MemoryMailer, Notifier, OutgoingMail},
    server::{router, AppState},
};
use entity::{Role, User};

pub const PASSWORD: &str = "Sup3r$ecret";

/// Peer address of every test request, as the server would see it on the socket.
pub const PEER: ([u8; 4], u16) = ([198, 51, 100, 20], 40000);

pub struct TestApp {
    pub state: Arc<AppState>,
    pub router: Router,
    pub mailer: MemoryMailer,
    pub clock: ManualClock,
    pub dir: TempDir,
}

/// A logged-in client.
#[derive(Debug, Clone)]
pub struct Client {
    pub session_key: String,
    pub csrf_token: String,
}

pub struct Reply {
    pub status: StatusCode,
    pub set_cookie: Option<String>,
    pub body: Value,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::defaults();
    config.database_url = "sqlite::memory:".into();
    config.upload_dir = dir.path().join("uploads");
    config.model_dir = dir.path().join("model");
    configure(&mut config);

    let pool = db::init(&config.database_url).await.unwrap();
    let clock = ManualClock::default();
    let shared_clock: Arc<dyn Clock> = Arc::new(clock.clone());
    let mailer = MemoryMailer::new();
    let notifier = Arc::new(
        Notifier::new(Arc::new(mailer.clone()), config.email_max_retries)
            .with_retry_delay(std::time::Duration::ZERO),
    );
    let pipeline = Pipeline::from_config(&config, shared_clock.clone()).unwrap();

    let state = Arc::new(AppState::new(
        config,
        pool,
        shared_clock,
        notifier,
        Arc::new(NoVerification),
        pipeline,
    ));

    TestApp {
        router: router(state.clone()),
        state,
        mailer,
        clock,
        dir,
    }
}

impl TestApp {
    pub async fn create_user(&self, name: &str, email: &str, role: Role) -> User {
        self.state
            .credentials
            .create_user(name, email, PASSWORD, role)
            .await
            .unwrap()
    }

    pub async fn send(&self, mut request: Request<Body>) -> Reply {
        if request.extensions().get::<ConnectInfo<SocketAddr>>().is_none() {
            request
                .extensions_mut()
                .insert(ConnectInfo(SocketAddr::from(PEER)));
        }
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        Reply {
            status,
            set_cookie,
            body,
        }
    }

    pub async fn get(&self, uri: &str, client: Option<&Client>) -> Reply {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(client) = client {
            builder = builder.header(
                header::COOKIE,
                format!("{}={}", SESSION_COOKIE_NAME, client.session_key),
            );
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// POST a JSON body, with the session cookie and CSRF header of `client` if given.
    pub async fn post_json(&self, uri: &str, body: Value, client: Option<&Client>) -> Reply {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", "203.0.113.7");
        if let Some(client) = client {
            builder = builder
                .header(
                    header::COOKIE,
                    format!("{}={}", SESSION_COOKIE_NAME, client.session_key),
                )
                .header(CSRF_HEADER_NAME, &client.csrf_token);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    /// POST a JSON body claiming to be forwarded for `forwarded_for`.
    pub async fn post_json_forwarded(&self, uri: &str, body: Value, forwarded_for: &str) -> Reply {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-forwarded-for", forwarded_for)
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    pub async fn login(&self, email: &str, password: &str) -> Client {
        let reply = self
            .post_json(
                "/login",
                serde_json::json!({ "email": email, "password": password }),
                None,
            )
            .await;
        assert_eq!(reply.status, StatusCode::OK, "login failed: {}", reply.body);

        let cookie = reply.set_cookie.expect("login sets a session cookie");
        let session_key = cookie
            .split(';')
            .next()
            .and_then(|pair| pair.split_once('='))
            .map(|(_, value)| value.to_string())
            .unwrap();
        Client {
            session_key,
            csrf_token: reply.body["csrfToken"].as_str().unwrap().to_string(),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Wait for a background email matching `predicate`.
    pub async fn wait_for_mail(&self, predicate: impl Fn(&OutgoingMail) -> bool) -> OutgoingMail {
        for _ in 0..200 {
            if let Some(mail) = self.mailer.sent().into_iter().find(|m| predicate(m)) {
                return mail;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("expected email was never sent: {:?}", self.mailer.sent());
    }
}

/// Pull the six-digit code out of a verification email.
pub fn otp_from(mail: &OutgoingMail) -> String {
    let re = regex::Regex::new(r"\b(\d{6})\b").unwrap();
    re.captures(&mail.html).unwrap()[1].to_string()
}

/// Some six-digit code other than `code`.
pub fn wrong_code(code: &str) -> String {
    if code == "123456" {
        "654321".into()
    } else {
        "123456".into()
    }
}
