use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::{
    auth::{AuthSession, ClientIp},
    constants::{ACTION_FORGOT_PASSWORD, RE_EMAIL},
    credentials::CredentialError,
    error::ServerError,
    handlers::{expired_session_cookie, ApiMessage, ValidatedJson},
    notify::Job,
    server::AppState,
    utils::{
        normalize_email,
        pass::{check_password, validate_password_strength},
    },
};

const FORGOT_PASSWORD_REPLY: &str =
    "If your email is registered, you will receive a password reset link shortly.";

/// The JSON input of a `POST /change_password` request.
#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ChangePasswordInput {
    current_password: String,
    #[validate(custom = "validate_password_strength")]
    new_password: String,
    #[validate(must_match(other = "new_password", message = "New passwords do not match"))]
    confirm_password: String,
}

/// Handler for `POST /change_password`
///
/// Reachable with an expired password, which is what it exists for.
pub(crate) async fn change_password(
    auth: AuthSession,
    state: Extension<Arc<AppState>>,
    ValidatedJson(input): ValidatedJson<ChangePasswordInput>,
) -> Result<(HeaderMap, Json<ApiMessage>), ServerError> {
    let user = auth.user;

    if !check_password(&user.password, &input.current_password).valid {
        return Err(ServerError::BadRequest("Current password is incorrect".into()));
    }
    if input.current_password == input.new_password {
        return Err(CredentialError::SamePassword.into());
    }

    let was_expired = user.is_password_expired(state.clock.now(), state.config.password_expiry_days);
    state
        .credentials
        .set_password(user.id, &input.new_password)
        .await?;
    state.dispatcher.submit(Job::PasswordChanged {
        email: user.email.clone(),
        name: user.name.clone(),
        by_admin: false,
    });
    tracing::info!(user = %user.id, "Password changed");

    if was_expired {
        // the session was only good for this change; start over with the new password
        state.credentials.end_session(&auth.session.key).await?;
        return Ok((
            expired_session_cookie(&state.config)?,
            ApiMessage::redirect(
                "Your password has been updated. Please log in with your new password.",
                "/login",
            ),
        ));
    }
    Ok((
        HeaderMap::new(),
        ApiMessage::ok("Your password has been updated successfully"),
    ))
}

/// The JSON input of a `POST /forgot_password` request.
#[derive(Debug, Validate, Deserialize)]
pub(crate) struct ForgotPasswordInput {
    #[validate(regex(path = "RE_EMAIL", message = "Please enter a valid email address"))]
    email: String,
    recaptcha: Option<String>,
}

/// Handler for `POST /forgot_password`
///
/// Replies the same whether or not the email belongs to an account.
pub(crate) async fn forgot_password(
    ClientIp(ip): ClientIp,
    state: Extension<Arc<AppState>>,
    ValidatedJson(input): ValidatedJson<ForgotPasswordInput>,
) -> Result<Json<ApiMessage>, ServerError> {
    let config = &state.config;

    if !state
        .rate_limiter
        .check_and_increment(
            &ip,
            ACTION_FORGOT_PASSWORD,
            config.max_otp_requests_per_ip,
            config.rate_limit_window(),
        )
        .await?
    {
        return Err(ServerError::RateLimited(
            "Too many requests from this IP. Please try again later.",
        ));
    }

    let response = input.recaptcha.as_deref().unwrap_or_default();
    if !state.human.verify(response, Some(&ip)).await {
        return Err(ServerError::BadRequest(
            "reCAPTCHA verification failed. Please try again.".into(),
        ));
    }

    let email = normalize_email(&input.email);
    if let Some(user) = state.credentials.find_by_email(&email).await? {
        let token = state
            .credentials
            .issue_reset_token(user.id, config.reset_token_lifetime())
            .await?;
        let link = format!(
            "{}/reset_password/{}",
            config.public_url.trim_end_matches('/'),
            token
        );
        state.dispatcher.submit(Job::ResetLink {
            email: user.email,
            name: user.name,
            link,
            valid_minutes: config.reset_token_minutes,
        });
    } else {
        tracing::info!("Password reset requested for an unknown email");
    }

    Ok(ApiMessage::ok(FORGOT_PASSWORD_REPLY))
}

/// The JSON input of a `POST /reset_password/:token` request.
#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResetPasswordInput {
    #[validate(custom = "validate_password_strength")]
    password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    confirm_password: String,
}

/// Handler for `POST /reset_password/:token`
pub(crate) async fn reset_password(
    Path(token): Path<String>,
    state: Extension<Arc<AppState>>,
    ValidatedJson(input): ValidatedJson<ResetPasswordInput>,
) -> Result<Json<ApiMessage>, ServerError> {
    let user = state
        .credentials
        .reset_password_with_token(&token, &input.password)
        .await?;
    state.dispatcher.submit(Job::PasswordChanged {
        email: user.email.clone(),
        name: user.name.clone(),
        by_admin: false,
    });
    tracing::info!(user = %user.id, "Password reset through emailed link");

    Ok(ApiMessage::redirect(
        "Your password has been reset successfully. You can now log in with your new password.",
        "/login",
    ))
}
