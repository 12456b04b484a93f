use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StoreError;
use crate::identity::{assign_role, issue_qr_token, IdentifierFormat};
use crate::models::{NewPatient, NewUser, Patient, PatientUpdate, User, UserUpdate};
use crate::repo::{PatientStore, UserStore};

#[derive(Debug, Default)]
struct Inner {
    users: Vec<User>,
    patients: Vec<Patient>,
    patient_sequence: u64,
}

/// In-memory registry store for testing and database-less development.
///
/// One mutex guards all tables, so every operation (including the
/// count-then-insert of [`UserStore::create_user`]) is atomic.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    format: IdentifierFormat,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identifier_format(format: IdentifierFormat) -> Self {
        Self {
            inner: Arc::default(),
            format,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave a half-written row behind.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.lock().users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .lock()
            .users
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn count_users(&self) -> Result<i64, StoreError> {
        Ok(self.lock().users.len() as i64)
    }

    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut inner = self.lock();
        if inner.users.iter().any(|u| u.username == new.username) {
            return Err(StoreError::Conflict(format!(
                "username '{}' is already taken",
                new.username
            )));
        }

        let role = new
            .role
            .unwrap_or_else(|| assign_role(inner.users.len() as i64, new.bootstrap));
        let now = Utc::now();
        let user = User {
            id: inner.users.len() as i64 + 1,
            username: new.username,
            password_hash: new.password_hash,
            name: new.name,
            email: new.email,
            phone: new.phone,
            role,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        inner.users.push(user.clone());
        tracing::debug!(user_id = user.id, role = %user.role, "user created in memory store");
        Ok(user)
    }

    async fn update_user(
        &self,
        id: i64,
        update: UserUpdate,
    ) -> Result<Option<User>, StoreError> {
        let mut inner = self.lock();
        let Some(user) = inner.users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        update.apply(user);
        user.updated_at = Utc::now();
        Ok(Some(user.clone()))
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.lock().users.clone())
    }
}

#[async_trait]
impl PatientStore for MemoryStore {
    async fn create_patient(&self, new: NewPatient) -> Result<Patient, StoreError> {
        let mut inner = self.lock();
        inner.patient_sequence += 1;
        let identifier = self.format.issue(inner.patient_sequence);
        if inner
            .patients
            .iter()
            .any(|p| p.identifier == identifier.as_str())
        {
            return Err(StoreError::Conflict(format!(
                "patient identifier '{identifier}' already issued"
            )));
        }
        let qr_token = issue_qr_token(&identifier);

        let now = Utc::now();
        let patient = Patient {
            id: inner.patients.len() as i64 + 1,
            identifier: identifier.into_inner(),
            qr_token: qr_token.into_inner(),
            full_name: new.full_name,
            date_of_birth: new.date_of_birth,
            gender: new.gender,
            phone: new.phone,
            address: new.address,
            guardian_name: new.guardian_name,
            created_by: new.created_by,
            created_at: now,
            updated_at: now,
        };
        inner.patients.push(patient.clone());
        tracing::debug!(patient_id = patient.id, identifier = %patient.identifier, "patient created in memory store");
        Ok(patient)
    }

    async fn get_patient(&self, id: i64) -> Result<Option<Patient>, StoreError> {
        Ok(self.lock().patients.iter().find(|p| p.id == id).cloned())
    }

    async fn get_patient_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<Patient>, StoreError> {
        Ok(self
            .lock()
            .patients
            .iter()
            .find(|p| p.identifier == identifier)
            .cloned())
    }

    async fn get_patient_by_qr_token(&self, token: &str) -> Result<Option<Patient>, StoreError> {
        Ok(self
            .lock()
            .patients
            .iter()
            .find(|p| p.qr_token == token)
            .cloned())
    }

    async fn update_patient(
        &self,
        id: i64,
        update: PatientUpdate,
    ) -> Result<Option<Patient>, StoreError> {
        let mut inner = self.lock();
        let Some(patient) = inner.patients.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        update.apply(patient);
        patient.updated_at = Utc::now();
        Ok(Some(patient.clone()))
    }

    async fn list_patients(&self) -> Result<Vec<Patient>, StoreError> {
        Ok(self.lock().patients.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn new_user(username: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            password_hash: "hash".to_string(),
            name: username.to_uppercase(),
            email: None,
            phone: None,
            role: None,
            bootstrap: false,
        }
    }

    fn new_patient(name: &str) -> NewPatient {
        NewPatient {
            full_name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_first_user_becomes_admin() {
        let store = MemoryStore::new();

        let alice = store.create_user(new_user("alice")).await.unwrap();
        let bob = store.create_user(new_user("bob")).await.unwrap();

        assert_eq!(alice.role, Role::Admin);
        assert_eq!(bob.role, Role::HealthWorker);
        assert_eq!(store.count_users().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_explicit_role_overrides_assignment() {
        let store = MemoryStore::new();

        let mut first = new_user("first");
        first.role = Some(Role::HealthWorker);
        let first = store.create_user(first).await.unwrap();
        assert_eq!(first.role, Role::HealthWorker);

        let mut second = new_user("second");
        second.bootstrap = true;
        let second = store.create_user(second).await.unwrap();
        assert_eq!(second.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let store = MemoryStore::new();
        store.create_user(new_user("alice")).await.unwrap();

        let err = store.create_user(new_user("alice")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.count_users().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_signups_yield_one_admin() {
        let store = MemoryStore::new();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.create_user(new_user(&format!("u{i}"))).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let admins = store
            .list_users()
            .await
            .unwrap()
            .into_iter()
            .filter(|u| u.role == Role::Admin)
            .count();
        assert_eq!(admins, 1);
    }

    #[tokio::test]
    async fn test_update_user_deactivates() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("carol")).await.unwrap();

        let updated = store
            .update_user(
                user.id,
                UserUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert!(!updated.is_active);

        let fetched = store.get_user_by_id(user.id).await.unwrap().unwrap();
        assert!(!fetched.is_active);
        assert!(store.update_user(99, UserUpdate::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_patients_get_distinct_identifiers_and_tokens() {
        let store = MemoryStore::new();

        let a = store.create_patient(new_patient("Amina")).await.unwrap();
        let b = store.create_patient(new_patient("Baraka")).await.unwrap();

        assert_eq!(a.identifier, "RH000001");
        assert_eq!(b.identifier, "RH000002");
        assert_ne!(a.qr_token, b.qr_token);

        // Fetching twice returns the same issued values
        let again = store.get_patient(a.id).await.unwrap().unwrap();
        assert_eq!(again.identifier, a.identifier);
        assert_eq!(again.qr_token, a.qr_token);
        let again = store.get_patient(a.id).await.unwrap().unwrap();
        assert_eq!(again.qr_token, a.qr_token);
    }

    #[tokio::test]
    async fn test_patient_lookup_by_identifier_and_token() {
        let store = MemoryStore::with_identifier_format(IdentifierFormat::new("VX", 4));
        let patient = store.create_patient(new_patient("Chausiku")).await.unwrap();
        assert_eq!(patient.identifier, "VX0001");

        let by_id = store
            .get_patient_by_identifier("VX0001")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_id.id, patient.id);

        let by_token = store
            .get_patient_by_qr_token(&patient.qr_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_token.id, patient.id);

        assert!(store.get_patient_by_qr_token("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_patient_keeps_issued_fields() {
        let store = MemoryStore::new();
        let patient = store.create_patient(new_patient("Dalia")).await.unwrap();

        let updated = store
            .update_patient(
                patient.id,
                PatientUpdate {
                    full_name: Some("Dalia M.".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.full_name, "Dalia M.");
        assert_eq!(updated.identifier, patient.identifier);
        assert_eq!(updated.qr_token, patient.qr_token);
    }
}
