use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::{header, HeaderMap, HeaderValue},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};
use validator::Validate;

use crate::{config::Config, constants::SESSION_COOKIE_NAME, error::ServerError};

pub(crate) mod admin;
pub(crate) mod login;
pub(crate) mod password;
pub(crate) mod signup;
pub(crate) mod upload;

pub(crate) use admin::*;
pub(crate) use login::*;
pub(crate) use password::*;
pub(crate) use signup::*;
pub(crate) use upload::*;

/// A validated JSON body.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ValidatedJson<T>(pub(crate) T);

#[async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(ValidatedJson(value))
    }
}

/// The body of most successful JSON responses.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ApiMessage {
    pub(crate) success: bool,
    pub(crate) message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) redirect_url: Option<String>,
}

impl ApiMessage {
    pub(crate) fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            redirect_url: None,
        })
    }

    pub(crate) fn redirect(message: impl Into<String>, to: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            redirect_url: Some(to.into()),
        })
    }
}

fn secure_attribute(config: &Config) -> &'static str {
    if config.public_url.starts_with("https://") {
        "; Secure"
    } else {
        ""
    }
}

/// `Set-Cookie` headers carrying a new session key.
pub(crate) fn session_cookie(config: &Config, key: &str) -> Result<HeaderMap, ServerError> {
    let value = format!(
        "{cname}={cval}; HttpOnly; SameSite=Strict; Path=/; Max-Age={age}{secure}",
        cname = SESSION_COOKIE_NAME,
        cval = key,
        age = config.session_lifetime().num_seconds(),
        secure = secure_attribute(config),
    );
    cookie_headers(value)
}

/// `Set-Cookie` headers that remove the session cookie.
pub(crate) fn expired_session_cookie(config: &Config) -> Result<HeaderMap, ServerError> {
    let value = format!(
        "{cname}=expired; HttpOnly; SameSite=Strict; Path=/; Max-Age=0{secure}",
        cname = SESSION_COOKIE_NAME,
        secure = secure_attribute(config),
    );
    cookie_headers(value)
}

fn cookie_headers(value: String) -> Result<HeaderMap, ServerError> {
    let mut headers = HeaderMap::new();
    let value = HeaderValue::from_str(&value)
        .map_err(|e| ServerError::Internal(anyhow::anyhow!("invalid cookie header: {}", e)))?;
    headers.insert(header::SET_COOKIE, value);
    Ok(headers)
}

/// Surface a field-level validation failure raised outside of a derived `Validate`.
pub(crate) fn field_error(field: &'static str, err: validator::ValidationError) -> ServerError {
    let mut errors = validator::ValidationErrors::new();
    errors.add(field, err);
    ServerError::ValidationError(errors)
}
