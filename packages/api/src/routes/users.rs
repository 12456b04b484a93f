//! Admin user management. Mounted behind `require_admin`.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, patch};
use axum::{Json, Router};
use serde::Deserialize;
use store::{NewUser, Role, UserInfo, UserStore, UserUpdate};
use tower_sessions::Session;

use super::auth::{optional, required, username};
use crate::auth::{self, session, CurrentUser};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/{id}", patch(update_user))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default = "default_role")]
    pub role: Role,
}

fn default_role() -> Role {
    Role::HealthWorker
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserInfo>>, AppError> {
    let users = state.store.list_users().await?;
    Ok(Json(users.iter().map(|u| u.to_info()).collect()))
}

/// Create an account with an explicitly chosen role.
async fn create_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    session: Session,
    Json(req): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserInfo>), AppError> {
    let username = username(&req.username)?;
    let name = required("name", &req.name)?;
    if req.password.is_empty() {
        return Err(AppError::Validation("password is required".into()));
    }
    let password_hash = auth::hash_password(&req.password).await?;

    let user = state
        .store
        .create_user(NewUser {
            username,
            password_hash,
            name,
            email: optional(req.email),
            phone: optional(req.phone),
            role: Some(req.role),
            bootstrap: false,
        })
        .await?;

    session::touch(&session, state.session_ttl);
    tracing::info!(admin_id = admin.id, user_id = user.id, role = %user.role, "user created by admin");

    Ok((StatusCode::CREATED, Json(user.to_info())))
}

/// Partial update, including soft deactivation and role changes.
async fn update_user(
    State(state): State<AppState>,
    CurrentUser(admin): CurrentUser,
    session: Session,
    Path(id): Path<i64>,
    Json(req): Json<UpdateUserRequest>,
) -> Result<Json<UserInfo>, AppError> {
    if id == admin.id && (req.is_active == Some(false) || req.role == Some(Role::HealthWorker)) {
        return Err(AppError::Validation(
            "admins cannot deactivate or demote themselves".into(),
        ));
    }

    let name = req.name.as_deref().map(|n| required("name", n)).transpose()?;
    let password_hash = match req.password.as_deref() {
        Some("") => return Err(AppError::Validation("password must not be empty".into())),
        Some(password) => Some(auth::hash_password(password).await?),
        None => None,
    };

    let update = UserUpdate {
        name,
        email: optional(req.email),
        phone: optional(req.phone),
        password_hash,
        role: req.role,
        is_active: req.is_active,
    };

    let user = state
        .store
        .update_user(id, update)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {id}")))?;

    session::touch(&session, state.session_ttl);
    tracing::info!(admin_id = admin.id, user_id = id, active = user.is_active, role = %user.role, "user updated");

    Ok(Json(user.to_info()))
}
