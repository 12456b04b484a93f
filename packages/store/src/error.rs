//! Store error type.

use thiserror::Error;

/// Errors returned by [`UserStore`](crate::UserStore) and
/// [`PatientStore`](crate::PatientStore) implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness rule was violated (username, patient identifier, QR token).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored row could not be turned back into a domain value.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
