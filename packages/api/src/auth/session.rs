//! # Session cookie and session-store upkeep
//!
//! Sessions live in a `tower-sessions` store (PostgreSQL in production, memory
//! otherwise). The client only ever holds the signed session id cookie; the
//! user id sits server-side under [`SESSION_USER_ID_KEY`].
//!
//! Cookie policy: HTTP-only, SameSite=Lax, `Secure` only when configured,
//! expiring after `ttl_hours` (24 by default) without a save. Authenticated
//! mutations call [`touch`] so the window restarts.

use std::time::Duration;

use axum::Router;
use sha2::{Digest, Sha512};
use tower_sessions::cookie::{Key, SameSite};
use tower_sessions::session_store::ExpiredDeletion;
use tower_sessions::{Expiry, Session, SessionManagerLayer, SessionStore};

use crate::error::AppError;
use crate::settings;

/// Key for storing the authenticated user's id in the session.
pub const SESSION_USER_ID_KEY: &str = "user_id";

/// Derive the 64-byte cookie signing key from the configured secret.
pub fn signing_key(secret: &str) -> Key {
    let digest = Sha512::digest(secret.as_bytes());
    Key::from(digest.as_slice())
}

/// Put `router` behind a session manager backed by `store`.
pub fn with_sessions<S>(router: Router, store: S, config: &settings::Session) -> Router
where
    S: SessionStore + Clone,
{
    let (secret, fallback) = config.secret_or_fallback();
    if fallback {
        tracing::warn!(
            "SESSION_SECRET is not set; signing session cookies with the insecure development default"
        );
    }
    if !config.secure {
        tracing::debug!("session cookie is not marked Secure");
    }

    let layer = SessionManagerLayer::new(store)
        .with_name(config.cookie_name.clone())
        .with_http_only(true)
        .with_secure(config.secure)
        .with_same_site(SameSite::Lax)
        .with_expiry(Expiry::OnInactivity(config.ttl()))
        .with_signed(signing_key(secret));

    router.layer(layer)
}

/// Bind the session to `user_id`, rotating the session id first.
pub async fn log_in(session: &Session, user_id: i64) -> Result<(), AppError> {
    session.cycle_id().await?;
    session.insert(SESSION_USER_ID_KEY, user_id).await?;
    Ok(())
}

/// Mark the session modified so it is saved with a fresh expiry.
pub fn touch(session: &Session, ttl: time::Duration) {
    session.set_expiry(Some(Expiry::OnInactivity(ttl)));
}

/// Delete expired sessions from `store` every `period`, forever.
///
/// Failures are logged and retried at the next tick.
pub async fn prune_expired<S>(store: S, period: Duration)
where
    S: ExpiredDeletion,
{
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match store.delete_expired().await {
            Ok(()) => tracing::debug!("pruned expired sessions"),
            Err(e) => tracing::warn!(error = %e, "failed to prune expired sessions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use tower_sessions::session::{Id, Record};
    use tower_sessions::session_store;
    use tower_sessions::MemoryStore;

    use super::*;

    /// Session store that keeps nothing and counts prune calls. The first
    /// prune fails.
    #[derive(Clone, Debug, Default)]
    struct CountingSessions {
        prunes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionStore for CountingSessions {
        async fn save(&self, _record: &Record) -> session_store::Result<()> {
            Ok(())
        }

        async fn load(&self, _id: &Id) -> session_store::Result<Option<Record>> {
            Ok(None)
        }

        async fn delete(&self, _id: &Id) -> session_store::Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl ExpiredDeletion for CountingSessions {
        async fn delete_expired(&self) -> session_store::Result<()> {
            if self.prunes.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(session_store::Error::Backend("store unavailable".into()));
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn prune_runs_every_period_and_survives_failures() {
        let store = CountingSessions::default();
        let period = Duration::from_secs(60);
        let task = tokio::spawn(prune_expired(store.clone(), period));

        // First tick fires immediately and fails
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(store.prunes.load(Ordering::SeqCst), 1);

        tokio::time::sleep(period * 3).await;
        assert!(store.prunes.load(Ordering::SeqCst) >= 3);

        let before = store.prunes.load(Ordering::SeqCst);
        tokio::time::sleep(period).await;
        assert!(store.prunes.load(Ordering::SeqCst) > before);

        task.abort();
    }

    #[test]
    fn signing_key_is_deterministic() {
        assert_eq!(
            signing_key("secret").master(),
            signing_key("secret").master()
        );
        assert_ne!(
            signing_key("secret").master(),
            signing_key("other").master()
        );
    }

    #[tokio::test]
    async fn log_in_stores_user_id() {
        let session = Session::new(None, Arc::new(MemoryStore::default()), None);
        log_in(&session, 42).await.unwrap();

        let user_id: Option<i64> = session.get(SESSION_USER_ID_KEY).await.unwrap();
        assert_eq!(user_id, Some(42));
    }

    #[tokio::test]
    async fn touch_sets_inactivity_expiry() {
        let session = Session::new(None, Arc::new(MemoryStore::default()), None);
        touch(&session, time::Duration::hours(24));
        assert!(matches!(session.expiry(), Some(Expiry::OnInactivity(d)) if d == time::Duration::hours(24)));
    }
}
