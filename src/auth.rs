use axum::{
    async_trait,
    extract::{ConnectInfo, Extension, FromRequestParts},
    http::{request::Parts, Method},
};
use axum_extra::{headers::Cookie, TypedHeader};
use std::net::SocketAddr;
use std::sync::Arc;

use entity::{Session, User};

use crate::{
    constants::{CSRF_HEADER_NAME, SESSION_COOKIE_NAME},
    error::ServerError,
    server::AppState,
};

async fn app_state<S: Send + Sync>(parts: &mut Parts, state: &S) -> Result<Arc<AppState>, ServerError> {
    let Extension(app) = Extension::<Arc<AppState>>::from_request_parts(parts, state)
        .await
        .map_err(|e| ServerError::Internal(anyhow::anyhow!("application state missing: {}", e)))?;
    Ok(app)
}

/// A request made within a live session.
///
/// State-changing methods must echo the session's CSRF token in the `X-CSRF-Token` header.
#[derive(Debug)]
pub(crate) struct AuthSession {
    pub(crate) session: Session,
    pub(crate) user: User,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = app_state(parts, state).await?;

        let cookie = Option::<TypedHeader<Cookie>>::from_request_parts(parts, state)
            .await
            .unwrap_or(None);
        let Some(key) = cookie
            .as_ref()
            .and_then(|TypedHeader(cookie)| cookie.get(SESSION_COOKIE_NAME))
        else {
            return Err(ServerError::Unauthorized);
        };

        let (session, user) = app
            .credentials
            .resolve_session(key, app.config.session_lifetime())
            .await?
            .ok_or(ServerError::Unauthorized)?;

        let safe = matches!(parts.method, Method::GET | Method::HEAD | Method::OPTIONS);
        if !safe {
            let presented = parts
                .headers
                .get(CSRF_HEADER_NAME)
                .and_then(|v| v.to_str().ok());
            if presented != Some(session.csrf_token.as_str()) {
                tracing::warn!(user = %user.id, "CSRF token mismatch");
                return Err(ServerError::Csrf);
            }
        }

        Ok(AuthSession { session, user })
    }
}

/// A logged-in user whose password has not expired.
#[derive(Debug)]
pub(crate) struct CurrentUser(pub(crate) User);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthSession { user, .. } = AuthSession::from_request_parts(parts, state).await?;
        let app = app_state(parts, state).await?;
        if user.is_password_expired(app.clock.now(), app.config.password_expiry_days) {
            return Err(ServerError::PasswordExpired);
        }
        Ok(CurrentUser(user))
    }
}

/// A logged-in administrator.
#[derive(Debug)]
pub(crate) struct AdminUser(pub(crate) User);

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            tracing::warn!(user = %user.id, "Non-admin attempted an admin action");
            return Err(ServerError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

/// The client address used to key per-client rate limits.
///
/// This is the peer address unless the server is configured to trust `X-Forwarded-For`, in
/// which case the header's first hop wins.
#[derive(Debug, Clone)]
pub(crate) struct ClientIp(pub(crate) String);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app = app_state(parts, state).await?;

        if app.config.trust_forwarded_for {
            let forwarded = parts
                .headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
            if let Some(ip) = forwarded {
                return Ok(ClientIp(ip));
            }
        }

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        Ok(ClientIp(peer.unwrap_or_else(|| "unknown".to_string())))
    }
}
