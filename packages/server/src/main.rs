//! Registry server binary.
//!
//! With a database URL configured, users, patients and sessions live in
//! PostgreSQL. Without one the server runs entirely in memory, which is only
//! fit for local development.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use api::{AppState, Settings};
use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower_sessions_sqlx_store::PostgresStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let settings = Settings::new().context("Failed to load settings")?;
    tracing::debug!(?settings, "loaded settings");

    let router = build_router(&settings).await?;

    let address = settings.server.address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;
    tracing::info!(%address, "registry listening");

    axum::serve(listener, router)
        .await
        .context("Server terminated with an error")?;
    Ok(())
}

/// Pick the stores from `settings` and assemble the application.
async fn build_router(settings: &Settings) -> anyhow::Result<Router> {
    let format = settings.patients.identifier_format();
    let ttl = settings.session.ttl();

    let Some(url) = settings.database.url.as_deref() else {
        tracing::warn!(
            "DATABASE_URL is not set; using in-memory stores. Data is lost on exit \
             and expired sessions are never pruned"
        );
        let state = AppState::new(
            Arc::new(store::MemoryStore::with_identifier_format(format)),
            ttl,
        );
        return Ok(api::app(
            state,
            tower_sessions::MemoryStore::default(),
            &settings.session,
        ));
    };

    let pool = PgPoolOptions::new()
        .max_connections(settings.database.max_connections)
        .connect(url)
        .await
        .context("Failed to connect to the database")?;
    store::migrate(&pool)
        .await
        .context("Failed to run registry migrations")?;
    tracing::info!("database migrations applied");

    let sessions = PostgresStore::new(pool.clone());
    sessions
        .migrate()
        .await
        .context("Failed to migrate the session store")?;
    tokio::spawn(api::auth::session::prune_expired(
        sessions.clone(),
        Duration::from_secs(settings.session.prune_interval_secs),
    ));

    let state = AppState::new(Arc::new(store::PgStore::new(pool, format)), ttl);
    Ok(api::app(state, sessions, &settings.session))
}
