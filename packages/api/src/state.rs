//! Shared application state.

use std::sync::Arc;

use store::RegistryStore;

/// State handed to every handler and gate.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RegistryStore>,
    /// Inactivity window re-applied when an authenticated mutation touches
    /// the session.
    pub session_ttl: time::Duration,
}

impl AppState {
    pub fn new(store: Arc<dyn RegistryStore>, session_ttl: time::Duration) -> Self {
        Self { store, session_ttl }
    }
}
