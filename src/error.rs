use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::credentials::CredentialError;
use crate::otp::OtpError;

const INTERNAL_SERVER_ERROR_MESSAGE: &str = "Server error. Please try again later.";

/// Any possible server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),

    #[error(transparent)]
    AxumJsonRejection(#[from] JsonRejection),

    #[error(transparent)]
    AxumPathRejection(#[from] PathRejection),

    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error(transparent)]
    Otp(#[from] OtpError),

    #[error(transparent)]
    Credentials(#[from] CredentialError),

    /// Storage failure during an administrator-triggered operation; the message is shown.
    #[error("{0}")]
    AdminDatabase(sqlx::Error),

    #[error("{0}")]
    RateLimited(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error("Please log in to access this page.")]
    Unauthorized,

    #[error("Your password has expired. Please change it to continue.")]
    PasswordExpired,

    #[error("You do not have permission to access this page.")]
    Forbidden,

    #[error("CSRF token expired or invalid. Please refresh the page.")]
    Csrf,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ServerError {
    /// Wrap a storage error raised on behalf of an administrator.
    pub(crate) fn admin(err: CredentialError) -> Self {
        match err {
            CredentialError::Database(e) => ServerError::AdminDatabase(e),
            other => ServerError::Credentials(other),
        }
    }

    fn status_and_message(&self) -> (StatusCode, String) {
        match self {
            ServerError::ValidationError(_) => {
                let message = format!("Input validation error: [{}]", self).replace('\n', ", ");
                (StatusCode::BAD_REQUEST, message)
            }
            ServerError::AxumJsonRejection(_) | ServerError::AxumPathRejection(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::SqlxError(e) => {
                tracing::error!("Sqlx error occurred: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    INTERNAL_SERVER_ERROR_MESSAGE.into(),
                )
            }
            ServerError::Otp(e) => {
                let status = match e {
                    OtpError::NotFound => StatusCode::NOT_FOUND,
                    OtpError::AlreadyRegistered => StatusCode::CONFLICT,
                    OtpError::Expired | OtpError::TooManyAttempts | OtpError::InvalidCode => {
                        StatusCode::BAD_REQUEST
                    }
                    OtpError::Delivery => StatusCode::BAD_GATEWAY,
                    OtpError::Hash(_) | OtpError::Database(_) => {
                        tracing::error!("OTP storage error: {:?}", e);
                        return (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            INTERNAL_SERVER_ERROR_MESSAGE.into(),
                        );
                    }
                };
                (status, e.to_string())
            }
            ServerError::Credentials(e) => {
                let status = match e {
                    CredentialError::NotFound(_) => StatusCode::NOT_FOUND,
                    CredentialError::InvalidCredentials => StatusCode::UNAUTHORIZED,
                    CredentialError::EmailTaken
                    | CredentialError::LastAdmin(_)
                    | CredentialError::SelfAction(_)
                    | CredentialError::InvalidResetToken
                    | CredentialError::SamePassword => StatusCode::BAD_REQUEST,
                    CredentialError::Hash(_) | CredentialError::Database(_) => {
                        tracing::error!("Credential storage error: {:?}", e);
                        return (
                            StatusCode::INTERNAL_SERVER_ERROR,
                            INTERNAL_SERVER_ERROR_MESSAGE.into(),
                        );
                    }
                };
                (status, e.to_string())
            }
            ServerError::AdminDatabase(e) => {
                tracing::error!("Database error during admin operation: {:?}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {}", e))
            }
            ServerError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            ServerError::PasswordExpired | ServerError::Forbidden => {
                (StatusCode::FORBIDDEN, self.to_string())
            }
            ServerError::Csrf => (StatusCode::BAD_REQUEST, self.to_string()),
            ServerError::Internal(e) => {
                tracing::error!("Unhandled error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An unexpected error occurred".into(),
                )
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}
