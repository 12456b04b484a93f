//! # Session guard
//!
//! Two gates composed in front of protected routes with
//! `axum::middleware::from_fn_with_state`:
//!
//! - [`require_authenticated`]: the session must name a user that still exists
//!   and is active;
//! - [`require_admin`]: as above, and the user's role must be admin.
//!
//! The user is re-read from the store on every request, so deactivation and role
//! changes take effect on the next request rather than at session expiry. A
//! session naming a missing or inactive user is destroyed.
//!
//! Handlers behind a gate receive the resolved identity through the
//! [`CurrentUser`] extractor.

use axum::extract::{FromRequestParts, Request, State};
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use store::{User, UserInfo, UserStore};
use tower_sessions::Session;

use super::session::SESSION_USER_ID_KEY;
use crate::error::AppError;
use crate::state::AppState;

/// Identity of the authenticated caller, without secret fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentUser(pub UserInfo);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(AppError::unauthenticated)
    }
}

/// Resolve the session to a live, active user.
///
/// - no user id in the session: Unauthorized, and `users` is not consulted;
/// - user missing or inactive: the session is flushed (a flush failure is only
///   logged) and the result is Unauthorized;
/// - store or session-store failure: Internal.
pub async fn resolve_session_user<U>(session: &Session, users: &U) -> Result<User, AppError>
where
    U: UserStore + ?Sized,
{
    let Some(user_id) = session.get::<i64>(SESSION_USER_ID_KEY).await? else {
        tracing::debug!("request without an authenticated session");
        return Err(AppError::unauthenticated());
    };

    match users.get_user_by_id(user_id).await? {
        Some(user) if user.is_active => Ok(user),
        found => {
            tracing::warn!(
                user_id,
                exists = found.is_some(),
                "session references a missing or inactive user, destroying it"
            );
            if let Err(e) = session.flush().await {
                tracing::warn!(user_id, error = %e, "failed to destroy session");
            }
            Err(AppError::unauthenticated())
        }
    }
}

/// Admin-only predicate.
pub fn authorize_admin(user: &UserInfo) -> Result<(), AppError> {
    if user.role.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden(format!(
            "role 'admin' required, caller has '{}'",
            user.role
        )))
    }
}

/// Gate: any active user.
pub async fn require_authenticated(
    State(state): State<AppState>,
    session: Session,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = resolve_session_user(&session, state.store.as_ref()).await?;
    request.extensions_mut().insert(CurrentUser(user.to_info()));
    Ok(next.run(request).await)
}

/// Gate: active admin.
pub async fn require_admin(
    State(state): State<AppState>,
    session: Session,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let user = resolve_session_user(&session, state.store.as_ref()).await?.to_info();
    if let Err(e) = authorize_admin(&user) {
        tracing::warn!(user_id = user.id, role = %user.role, "admin route refused");
        return Err(e);
    }
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use store::{MemoryStore, NewUser, Role, StoreError, UserUpdate};
    use tower_sessions::MemoryStore as SessionMemoryStore;

    use super::*;

    /// Counts lookups by id on top of an in-memory store.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        lookups: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl UserStore for CountingStore {
        async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StoreError::Corrupt("store unavailable".into()));
            }
            self.inner.get_user_by_id(id).await
        }

        async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
            self.inner.get_user_by_username(username).await
        }

        async fn count_users(&self) -> Result<i64, StoreError> {
            self.inner.count_users().await
        }

        async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
            self.inner.create_user(new).await
        }

        async fn update_user(
            &self,
            id: i64,
            update: UserUpdate,
        ) -> Result<Option<User>, StoreError> {
            self.inner.update_user(id, update).await
        }

        async fn list_users(&self) -> Result<Vec<User>, StoreError> {
            self.inner.list_users().await
        }
    }

    fn new_session() -> Session {
        Session::new(None, Arc::new(SessionMemoryStore::default()), None)
    }

    async fn add_user(store: &CountingStore, username: &str) -> User {
        store
            .create_user(NewUser {
                username: username.into(),
                password_hash: "hash".into(),
                name: username.into(),
                email: None,
                phone: None,
                role: None,
                bootstrap: false,
            })
            .await
            .unwrap()
    }

    async fn session_for(user_id: i64) -> Session {
        let session = new_session();
        session.insert(SESSION_USER_ID_KEY, user_id).await.unwrap();
        session
    }

    #[tokio::test]
    async fn missing_session_is_rejected_without_lookup() {
        let store = CountingStore::default();
        add_user(&store, "alice").await;

        let err = resolve_session_user(&new_session(), &store).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
        assert_eq!(store.lookups.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn active_user_is_resolved() {
        let store = CountingStore::default();
        let alice = add_user(&store, "alice").await;

        let session = session_for(alice.id).await;
        let user = resolve_session_user(&session, &store).await.unwrap();
        assert_eq!(user.to_info(), alice.to_info());
        assert_eq!(store.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inactive_user_destroys_session() {
        let store = CountingStore::default();
        add_user(&store, "alice").await;
        let bob = add_user(&store, "bob").await;
        store
            .update_user(
                bob.id,
                UserUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let session = session_for(bob.id).await;
        let err = resolve_session_user(&session, &store).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let user_id: Option<i64> = session.get(SESSION_USER_ID_KEY).await.unwrap();
        assert!(user_id.is_none());
    }

    #[tokio::test]
    async fn missing_user_destroys_session() {
        let store = CountingStore::default();

        let session = session_for(42).await;
        let err = resolve_session_user(&session, &store).await.unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));

        let user_id: Option<i64> = session.get(SESSION_USER_ID_KEY).await.unwrap();
        assert!(user_id.is_none());
    }

    #[tokio::test]
    async fn unauthorized_message_does_not_reveal_cause() {
        let store = CountingStore::default();
        let no_session = resolve_session_user(&new_session(), &store).await.unwrap_err();
        let unknown_user = resolve_session_user(&session_for(42).await, &store)
            .await
            .unwrap_err();
        assert_eq!(no_session.to_string(), unknown_user.to_string());
    }

    #[tokio::test]
    async fn store_failure_is_internal_and_keeps_session() {
        let store = CountingStore {
            fail: true,
            ..Default::default()
        };

        let session = session_for(1).await;
        let err = resolve_session_user(&session, &store).await.unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));

        let user_id: Option<i64> = session.get(SESSION_USER_ID_KEY).await.unwrap();
        assert_eq!(user_id, Some(1));
    }

    #[test]
    fn admin_predicate() {
        let mut info = UserInfo {
            id: 1,
            username: "alice".into(),
            name: "Alice".into(),
            email: None,
            phone: None,
            role: Role::Admin,
            is_active: true,
        };
        assert!(authorize_admin(&info).is_ok());

        info.role = Role::HealthWorker;
        assert!(matches!(authorize_admin(&info), Err(AppError::Forbidden(_))));
    }
}
