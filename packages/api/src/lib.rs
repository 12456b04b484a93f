//! # API crate: HTTP surface of the vaccination registry
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`auth`] | Password hashing, session cookie, and the session guard gates |
//! | [`error`] | `AppError` and its JSON rendering |
//! | [`routes`] | Account, admin user management and patient handlers |
//! | [`settings`] | Layered configuration (`config` + `dotenvy`) |
//! | [`state`] | `AppState` shared by handlers and gates |
//!
//! ## Routes
//!
//! | Gate | Paths |
//! |------|-------|
//! | none | `GET /health`, `POST /api/auth/{signup,login,logout}` |
//! | [`auth::require_authenticated`] | `GET /api/auth/me`, `/api/patients/*` |
//! | [`auth::require_admin`] | `/api/users/*` |
//!
//! Every gated request re-reads the session's user from the store; see
//! [`auth::guard`].

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tower_sessions::SessionStore;

pub mod auth;
pub mod error;
pub mod routes;
pub mod settings;
pub mod state;

pub use error::AppError;
pub use settings::Settings;
pub use state::AppState;

/// Assemble the application router behind a session manager backed by
/// `session_store`.
pub fn app<S>(state: AppState, session_store: S, session: &settings::Session) -> Router
where
    S: SessionStore + Clone,
{
    let public = Router::new()
        .route("/api/auth/signup", post(routes::auth::signup))
        .route("/api/auth/login", post(routes::auth::login))
        .route("/api/auth/logout", post(routes::auth::logout));

    let authenticated = Router::new()
        .route("/api/auth/me", get(routes::auth::me))
        .merge(routes::patients::router())
        .route_layer(from_fn_with_state(
            state.clone(),
            auth::require_authenticated,
        ));

    let admin = routes::users::router()
        .route_layer(from_fn_with_state(state.clone(), auth::require_admin));

    let api = Router::new()
        .merge(public)
        .merge(authenticated)
        .merge(admin)
        .with_state(state);

    let router = Router::new().route("/health", get(health)).merge(api);

    auth::session::with_sessions(router, session_store, session).layer(TraceLayer::new_for_http())
}

/// Liveness probe.
async fn health() -> &'static str {
    "ok"
}
