use axum::{
    extract::{Extension, Path},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use entity::{Role, User};

use crate::{
    auth::AdminUser,
    constants::RE_EMAIL,
    credentials::UserChanges,
    error::ServerError,
    handlers::{ApiMessage, ValidatedJson},
    notify::Job,
    server::AppState,
    utils::normalize_email,
};

/// The response output for one user in admin listings
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserSummary {
    id: Uuid,
    name: String,
    email: String,
    role: Role,
    created_at: DateTime<Utc>,
    last_password_change: DateTime<Utc>,
    password_expired: bool,
    days_until_password_expires: i64,
}

impl UserSummary {
    fn new(user: User, now: DateTime<Utc>, expiry_days: i64) -> Self {
        Self {
            password_expired: user.is_password_expired(now, expiry_days),
            days_until_password_expires: user.days_until_password_expires(now, expiry_days),
            id: user.id,
            name: user.name,
            email: user.email,
            role: user.role,
            created_at: user.created_at,
            last_password_change: user.last_password_change,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct UserListResponse {
    users: Vec<UserSummary>,
}

/// Handler for `GET /admin/users`
pub(crate) async fn list_users(
    AdminUser(_admin): AdminUser,
    state: Extension<Arc<AppState>>,
) -> Result<Json<UserListResponse>, ServerError> {
    let now = state.clock.now();
    let expiry_days = state.config.password_expiry_days;
    let users = state
        .credentials
        .list_users()
        .await
        .map_err(ServerError::AdminDatabase)?
        .into_iter()
        .map(|user| UserSummary::new(user, now, expiry_days))
        .collect();
    Ok(Json(UserListResponse { users }))
}

fn validate_role(role: &str) -> Result<(), ValidationError> {
    role.parse::<Role>().map(|_| ()).map_err(|_| {
        let mut err = ValidationError::new("role");
        err.message = Some("Role must be admin or user".into());
        err
    })
}

/// The JSON input of a `POST /admin/update_user` request.
#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateUserInput {
    user_id: Uuid,
    #[validate(length(min = 1, max = 100, message = "Name must be 1 to 100 characters"))]
    name: String,
    #[validate(regex(path = "RE_EMAIL", message = "Please enter a valid email address"))]
    email: String,
    #[validate(custom = "validate_role")]
    role: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct UpdateUserResponse {
    success: bool,
    message: String,
    user: UserSummary,
}

/// Handler for `POST /admin/update_user`
pub(crate) async fn update_user(
    AdminUser(admin): AdminUser,
    state: Extension<Arc<AppState>>,
    ValidatedJson(input): ValidatedJson<UpdateUserInput>,
) -> Result<Json<UpdateUserResponse>, ServerError> {
    let role = input
        .role
        .parse::<Role>()
        .map_err(ServerError::BadRequest)?;
    let changes = UserChanges {
        name: input.name.trim().to_string(),
        email: normalize_email(&input.email),
        role,
    };

    let user = state
        .credentials
        .update_user(input.user_id, &changes)
        .await
        .map_err(ServerError::admin)?;
    tracing::info!(admin = %admin.id, user = %user.id, "Admin updated user");

    Ok(Json(UpdateUserResponse {
        success: true,
        message: format!("User {} updated successfully", user.name),
        user: UserSummary::new(user, state.clock.now(), state.config.password_expiry_days),
    }))
}

/// Handler for `POST /admin/delete_user/:id`
pub(crate) async fn delete_user(
    AdminUser(admin): AdminUser,
    state: Extension<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<ApiMessage>, ServerError> {
    let user = state
        .credentials
        .delete_user(admin.id, user_id)
        .await
        .map_err(ServerError::admin)?;
    Ok(ApiMessage::ok(format!("User {} deleted successfully", user.name)))
}

/// The JSON input of a `POST /admin/reset_password` request.
#[derive(Debug, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AdminResetInput {
    user_id: Uuid,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AdminResetResponse {
    success: bool,
    message: String,
    temp_password: String,
}

/// Handler for `POST /admin/reset_password`
pub(crate) async fn reset_user_password(
    AdminUser(admin): AdminUser,
    state: Extension<Arc<AppState>>,
    ValidatedJson(input): ValidatedJson<AdminResetInput>,
) -> Result<Json<AdminResetResponse>, ServerError> {
    let (user, temp_password) = state
        .credentials
        .reset_password_by_admin(admin.id, input.user_id)
        .await
        .map_err(ServerError::admin)?;

    state.dispatcher.submit(Job::PasswordChanged {
        email: user.email.clone(),
        name: user.name.clone(),
        by_admin: true,
    });

    Ok(Json(AdminResetResponse {
        success: true,
        message: format!("Password for {} has been reset", user.name),
        temp_password,
    }))
}
