use axum::{extract::Extension, Json};
use serde::Deserialize;
use std::sync::Arc;
use validator::Validate;

use crate::{
    auth::ClientIp,
    constants::{
        ACTION_REQUEST_OTP_EMAIL, ACTION_REQUEST_OTP_IP, ACTION_VERIFY_OTP, EMAIL_KEY_PREFIX,
        RE_EMAIL, RE_OTP,
    },
    error::ServerError,
    handlers::{field_error, ApiMessage, ValidatedJson},
    otp::OtpError,
    server::AppState,
    utils::{normalize_email, pass::validate_password_strength},
};

/// The JSON input of a `POST /request_otp` request.
#[derive(Debug, Validate, Deserialize)]
pub(crate) struct RequestOtpInput {
    #[validate(regex(path = "RE_EMAIL", message = "Please enter a valid email address"))]
    email: String,
    #[validate(length(max = 100, message = "Name can be at most 100 characters"))]
    name: Option<String>,
    #[serde(default)]
    resend: bool,
    /// The reCAPTCHA response token; not needed for resends.
    recaptcha: Option<String>,
}

/// Handler for `POST /request_otp`
pub(crate) async fn request_otp(
    ClientIp(ip): ClientIp,
    state: Extension<Arc<AppState>>,
    ValidatedJson(input): ValidatedJson<RequestOtpInput>,
) -> Result<Json<ApiMessage>, ServerError> {
    let config = &state.config;
    let email = normalize_email(&input.email);

    if !state
        .rate_limiter
        .check_and_increment(
            &ip,
            ACTION_REQUEST_OTP_IP,
            config.max_otp_requests_per_ip,
            config.rate_limit_window(),
        )
        .await?
    {
        return Err(ServerError::RateLimited(
            "Too many requests from this IP. Please try again later.",
        ));
    }

    if state.credentials.email_exists(&email).await? {
        return Err(OtpError::AlreadyRegistered.into());
    }

    if !input.resend {
        let response = input.recaptcha.as_deref().unwrap_or_default();
        if !state.human.verify(response, Some(&ip)).await {
            return Err(ServerError::BadRequest(
                "reCAPTCHA verification failed. Please try again.".into(),
            ));
        }
    }

    let name = match input.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ if input.resend => state.otp.pending_name(&email).await?.unwrap_or_default(),
        _ => return Err(ServerError::BadRequest("Name is required".into())),
    };

    // counted only once the request is otherwise valid
    if !state
        .rate_limiter
        .check_and_increment(
            &format!("{}{}", EMAIL_KEY_PREFIX, email),
            ACTION_REQUEST_OTP_EMAIL,
            config.max_otp_requests_per_email,
            config.rate_limit_window(),
        )
        .await?
    {
        return Err(ServerError::RateLimited(
            "Too many verification requests for this email. Please try again later.",
        ));
    }

    state.otp.request_code(&email, &name).await?;
    Ok(ApiMessage::ok("Verification code sent to your email"))
}

/// Details of the account created once the code checks out.
#[derive(Debug, Deserialize)]
pub(crate) struct NewAccountDetails {
    name: Option<String>,
    password: String,
}

/// The JSON input of a `POST /verify_otp` request.
#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VerifyOtpInput {
    #[validate(regex(path = "RE_EMAIL", message = "Please enter a valid email address"))]
    email: String,
    #[validate(regex(path = "RE_OTP", message = "Verification code must be 6 digits"))]
    otp: String,
    user_data: NewAccountDetails,
}

/// Handler for `POST /verify_otp`
pub(crate) async fn verify_otp(
    ClientIp(ip): ClientIp,
    state: Extension<Arc<AppState>>,
    ValidatedJson(input): ValidatedJson<VerifyOtpInput>,
) -> Result<Json<ApiMessage>, ServerError> {
    let config = &state.config;

    if !state
        .rate_limiter
        .check_and_increment(
            &ip,
            ACTION_VERIFY_OTP,
            config.max_failed_verifications,
            config.rate_limit_window(),
        )
        .await?
    {
        return Err(ServerError::RateLimited(
            "Too many verification attempts. Please try again later.",
        ));
    }

    validate_password_strength(&input.user_data.password)
        .map_err(|e| field_error("password", e))?;

    let email = normalize_email(&input.email);
    state
        .otp
        .verify_code(
            &email,
            &input.otp,
            input.user_data.name.as_deref(),
            &input.user_data.password,
        )
        .await?;

    Ok(ApiMessage::redirect(
        "Account created successfully! You can now log in.",
        "/login",
    ))
}
