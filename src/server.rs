use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Extension},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    captcha::{HumanVerifier, NoVerification, Recaptcha},
    clock::{Clock, SystemClock},
    config::Config,
    credentials::CredentialStore,
    db,
    handlers,
    inference::Pipeline,
    notify::{Dispatcher, LogMailer, Mailer, Notifier, SmtpMailer},
    otp::OtpVerifier,
    rate_limit::RateLimiter,
};

const PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Everything a request handler can reach, built once at startup.
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub clock: Arc<dyn Clock>,
    pub credentials: CredentialStore,
    pub rate_limiter: RateLimiter,
    pub otp: OtpVerifier,
    pub notifier: Arc<Notifier>,
    pub dispatcher: Dispatcher,
    pub human: Arc<dyn HumanVerifier>,
    pub pipeline: Pipeline,
}

impl AppState {
    /// Wire up the services over an already migrated pool.
    ///
    /// Starts the notification workers, so it must run inside a Tokio runtime.
    pub fn new(
        config: Config,
        pool: SqlitePool,
        clock: Arc<dyn Clock>,
        notifier: Arc<Notifier>,
        human: Arc<dyn HumanVerifier>,
        pipeline: Pipeline,
    ) -> Self {
        let credentials = CredentialStore::new(pool.clone(), clock.clone());
        let dispatcher = Dispatcher::start(
            config.notify_workers,
            config.notify_queue_capacity,
            notifier.clone(),
            credentials.clone(),
        );
        let otp = OtpVerifier::new(
            pool.clone(),
            clock.clone(),
            notifier.clone(),
            dispatcher.clone(),
            config.otp_ttl(),
            config.max_otp_attempts,
        );

        AppState {
            rate_limiter: RateLimiter::new(pool.clone(), clock.clone()),
            config: Arc::new(config),
            pool,
            clock,
            credentials,
            otp,
            notifier,
            dispatcher,
            human,
            pipeline,
        }
    }
}

/// Build the router over a ready state.
pub fn router(state: Arc<AppState>) -> Router {
    let body_limit = state.config.max_upload_bytes;

    let admin = Router::new()
        .route("/users", get(handlers::list_users))
        .route("/update_user", post(handlers::update_user))
        .route("/delete_user/:id", post(handlers::delete_user))
        .route("/reset_password", post(handlers::reset_user_password));

    Router::new()
        .route("/health", get(health))
        .route("/login", post(handlers::login))
        .route("/logout", post(handlers::logout))
        .route("/request_otp", post(handlers::request_otp))
        .route("/verify_otp", post(handlers::verify_otp))
        .route("/forgot_password", post(handlers::forgot_password))
        .route("/reset_password/:token", post(handlers::reset_password))
        .route("/change_password", post(handlers::change_password))
        .route("/upload", post(handlers::upload))
        .nest("/admin", admin)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(Extension(state))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http())
}

/// Turn a panicking handler into the usual JSON error instead of a dropped connection.
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    error!("Request handler panicked: {}", detail);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "message": "An unexpected error occurred" })),
    )
        .into_response()
}

async fn health(state: Extension<Arc<AppState>>) -> Json<Value> {
    let database = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => "ok",
        Err(e) => {
            error!("Health check could not reach the database: {}", e);
            "unavailable"
        }
    };
    Json(json!({ "status": "ok", "database": database }))
}

fn mailer_from_config(config: &Config) -> Result<Arc<dyn Mailer>> {
    match &config.smtp_host {
        Some(host) => Ok(Arc::new(
            SmtpMailer::from_config(config, host).context("configuring SMTP")?,
        )),
        None => {
            warn!("SMTP_HOST is not set; outgoing email will only be logged");
            Ok(Arc::new(LogMailer))
        }
    }
}

fn verifier_from_config(config: &Config) -> Result<Arc<dyn HumanVerifier>> {
    match &config.recaptcha_secret {
        Some(secret) => Ok(Arc::new(
            Recaptcha::new(secret.clone()).context("building reCAPTCHA client")?,
        )),
        None => {
            warn!("RECAPTCHA_SECRET is not set; human verification is disabled");
            Ok(Arc::new(NoVerification))
        }
    }
}

/// Periodically drop rows that can no longer matter: stale rate limit counters, run-out sessions
/// and reset tokens, and abandoned verification codes.
fn spawn_pruner(state: Arc<AppState>) {
    tokio::spawn(async move {
        let retention = state.config.rate_limit_retention();
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            interval.tick().await;
            if let Err(e) = state.rate_limiter.prune(retention).await {
                error!("Pruning rate limit counters failed: {}", e);
            }
            if let Err(e) = state.credentials.prune_sessions().await {
                error!("Pruning sessions failed: {}", e);
            }
            if let Err(e) = state.credentials.prune_reset_tokens().await {
                error!("Pruning password reset tokens failed: {}", e);
            }
            if let Err(e) = state.otp.prune(retention).await {
                error!("Pruning verification codes failed: {}", e);
            }
        }
    });
}

/// Run the server.
pub async fn run(config: Config) -> Result<()> {
    let pool = db::init(&config.database_url)
        .await
        .with_context(|| format!("opening database {}", config.database_url))?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let bootstrap_store = CredentialStore::new(pool.clone(), clock.clone());
    if let Some(password) =
        db::bootstrap_admin(&bootstrap_store, &config.admin_email, config.admin_password.as_deref())
            .await
            .context("bootstrapping admin user")?
    {
        warn!(email = %config.admin_email, password = %password, "Generated admin password, change it after logging in");
    }

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .with_context(|| format!("creating upload directory {}", config.upload_dir.display()))?;

    let notifier = Arc::new(Notifier::new(
        mailer_from_config(&config)?,
        config.email_max_retries,
    ));
    let human = verifier_from_config(&config)?;
    let pipeline = Pipeline::from_config(&config, clock.clone())?;
    let addr = config.addr;

    let state = Arc::new(AppState::new(
        config,
        pool,
        clock,
        notifier,
        human,
        pipeline,
    ));
    spawn_pruner(state.clone());

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Listening on {}", addr);
    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt; // for `oneshot`

    async fn broken() -> &'static str {
        panic!("handler bug")
    }

    #[tokio::test]
    async fn handler_panics_become_json_errors() {
        let app = Router::new()
            .route("/broken", get(broken))
            .layer(CatchPanicLayer::custom(handle_panic));

        let response = app
            .oneshot(Request::get("/broken").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "An unexpected error occurred");
    }
}
