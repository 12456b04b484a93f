//! # Registry store: users, patients and the identity rules they are created with
//!
//! The persistence boundary for the vaccination registry. Route handlers and the
//! session guard in the `api` crate talk to storage only through the
//! [`UserStore`] and [`PatientStore`] traits defined in [`repo`].
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | `User`, `Patient`, their create/update payloads and the client-safe `UserInfo` |
//! | [`identity`] | First-user role assignment, patient identifiers, QR lookup tokens |
//! | [`repo`] | Store traits consumed by the API layer |
//! | `memory` | In-memory store for tests and database-less development |
//! | `postgres` | PostgreSQL store (feature `postgres`) |

pub mod error;
pub mod identity;
pub mod models;
pub mod repo;

mod memory;
pub use memory::MemoryStore;

#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "postgres")]
pub use postgres::{migrate, PgStore};

pub use error::StoreError;
pub use identity::{assign_role, issue_qr_token, IdentifierFormat, PatientIdentifier, QrToken};
pub use models::{
    NewPatient, NewUser, Patient, PatientUpdate, Role, User, UserInfo, UserUpdate,
};
pub use repo::{PatientStore, RegistryStore, UserStore};
