//! Storage traits consumed by the API layer.

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{NewPatient, NewUser, Patient, PatientUpdate, User, UserUpdate};

/// Account storage.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;

    async fn count_users(&self) -> Result<i64, StoreError>;

    /// Insert a new account.
    ///
    /// When `new.role` is `None` the role comes from
    /// [`assign_role`](crate::identity::assign_role) evaluated against the user
    /// count observed in the same critical section as the insert. Fails with
    /// [`StoreError::Conflict`] if the username is taken.
    async fn create_user(&self, new: NewUser) -> Result<User, StoreError>;

    /// Apply a partial update. Returns `None` if the user does not exist.
    async fn update_user(&self, id: i64, update: UserUpdate)
        -> Result<Option<User>, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;
}

/// Patient storage.
#[async_trait]
pub trait PatientStore: Send + Sync {
    /// Insert a patient, issuing its identifier and QR token.
    async fn create_patient(&self, new: NewPatient) -> Result<Patient, StoreError>;

    async fn get_patient(&self, id: i64) -> Result<Option<Patient>, StoreError>;

    async fn get_patient_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<Patient>, StoreError>;

    async fn get_patient_by_qr_token(&self, token: &str) -> Result<Option<Patient>, StoreError>;

    /// Apply a partial update. Identifier and QR token are never touched.
    async fn update_patient(
        &self,
        id: i64,
        update: PatientUpdate,
    ) -> Result<Option<Patient>, StoreError>;

    async fn list_patients(&self) -> Result<Vec<Patient>, StoreError>;
}

/// Everything the registry API needs from storage.
pub trait RegistryStore: UserStore + PatientStore {}

impl<T: UserStore + PatientStore> RegistryStore for T {}
