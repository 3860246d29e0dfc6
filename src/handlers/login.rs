use axum::{extract::Extension, http::HeaderMap, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use crate::{
    auth::AuthSession,
    constants::RE_EMAIL,
    error::ServerError,
    handlers::{expired_session_cookie, session_cookie, ApiMessage, ValidatedJson},
    server::AppState,
    utils::normalize_email,
};

/// The JSON input of a `POST /login` request.
#[derive(Debug, Validate, Deserialize)]
pub(crate) struct LoginInput {
    #[validate(regex(path = "RE_EMAIL", message = "Please enter a valid email address"))]
    email: String,
    #[validate(length(min = 1, max = 128, message = "Password is required"))]
    password: String,
}

/// The response output for `POST /login`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LoginResponse {
    success: bool,
    message: String,
    csrf_token: String,
    redirect_url: String,
    password_expired: bool,
    days_until_password_expires: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

/// Handler for `POST /login`
pub(crate) async fn login(
    state: Extension<Arc<AppState>>,
    ValidatedJson(input): ValidatedJson<LoginInput>,
) -> Result<(HeaderMap, Json<LoginResponse>), ServerError> {
    let config = &state.config;
    let email = normalize_email(&input.email);

    let user = state.credentials.authenticate(&email, &input.password).await?;
    let session = state
        .credentials
        .create_session(user.id, config.session_lifetime())
        .await?;
    tracing::info!(user = %user.id, "User logged in");

    let now = state.clock.now();
    let expired = user.is_password_expired(now, config.password_expiry_days);
    let days_left = user.days_until_password_expires(now, config.password_expiry_days);

    let (message, redirect_url, warning) = if expired {
        (
            "Your password has expired. Please change it to continue.".to_string(),
            "/change_password?expired=true".to_string(),
            None,
        )
    } else if days_left <= config.password_warning_days {
        (
            "Login successful".to_string(),
            "/".to_string(),
            Some(format!(
                "Your password will expire in {} days. Please change it soon.",
                days_left
            )),
        )
    } else {
        ("Login successful".to_string(), "/".to_string(), None)
    };

    Ok((
        session_cookie(config, &session.key)?,
        Json(LoginResponse {
            success: true,
            message,
            csrf_token: session.csrf_token,
            redirect_url,
            password_expired: expired,
            days_until_password_expires: days_left,
            warning,
        }),
    ))
}

/// Handler for `POST /logout`
pub(crate) async fn logout(
    auth: AuthSession,
    state: Extension<Arc<AppState>>,
) -> Result<(HeaderMap, Json<ApiMessage>), ServerError> {
    state.credentials.end_session(&auth.session.key).await?;
    tracing::info!(user = %auth.user.id, "User logged out");
    Ok((
        expired_session_cookie(&state.config)?,
        ApiMessage::redirect("You have been logged out.", "/login"),
    ))
}
