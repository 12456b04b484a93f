//! Account routes: signup, login, logout, current user.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use store::{NewUser, UserInfo, UserStore};
use tower_sessions::Session;

use crate::auth::{self, session, CurrentUser};
use crate::error::AppError;
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "invalid username or password";

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    /// Claim the bootstrap (admin) account.
    #[serde(default)]
    pub bootstrap: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Trim a required text field, rejecting it if nothing is left.
pub(crate) fn required(field: &str, value: &str) -> Result<String, AppError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AppError::Validation(format!("{field} is required")));
    }
    Ok(value.to_string())
}

/// Trim an optional text field, treating blank as absent.
pub(crate) fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn username(value: &str) -> Result<String, AppError> {
    let username = required("username", value)?.to_lowercase();
    if username.chars().any(char::is_whitespace) {
        return Err(AppError::Validation(
            "username must not contain whitespace".into(),
        ));
    }
    Ok(username)
}

/// Create an account and log it in. The first account becomes admin.
pub async fn signup(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<SignupRequest>,
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
            role: None,
            bootstrap: req.bootstrap,
        })
        .await?;

    session::log_in(&session, user.id).await?;
    tracing::info!(user_id = user.id, role = %user.role, "account created");

    Ok((StatusCode::CREATED, Json(user.to_info())))
}

/// Log in with username and password.
pub async fn login(
    State(state): State<AppState>,
    session: Session,
    Json(req): Json<LoginRequest>,
) -> Result<Json<UserInfo>, AppError> {
    let username = req.username.trim().to_lowercase();

    let found = state.store.get_user_by_username(&username).await?;
    let matches =
        auth::verify_password(&req.password, found.as_ref().map(|u| u.password_hash.as_str()))
            .await?;
    let user = match found {
        Some(user) if matches && user.is_active => user,
        Some(user) => {
            tracing::warn!(user_id = user.id, "login refused");
            return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
        }
        None => return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into())),
    };

    session::log_in(&session, user.id).await?;
    tracing::info!(user_id = user.id, "logged in");

    Ok(Json(user.to_info()))
}

/// Destroy the session.
pub async fn logout(session: Session) -> Result<StatusCode, AppError> {
    session.flush().await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The user resolved by the session guard.
pub async fn me(CurrentUser(user): CurrentUser) -> Json<UserInfo> {
    Json(user)
}
