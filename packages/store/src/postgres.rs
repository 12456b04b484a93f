//! PostgreSQL registry store.
//!
//! Uniqueness of usernames, patient identifiers and QR tokens is enforced by
//! `UNIQUE` constraints; violations surface as [`StoreError::Conflict`].
//! Patient identifiers draw from the `patient_identifier_seq` sequence.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};

use crate::error::StoreError;
use crate::identity::{assign_role, issue_qr_token, IdentifierFormat};
use crate::models::{NewPatient, NewUser, Patient, PatientUpdate, Role, User, UserUpdate};
use crate::repo::{PatientStore, UserStore};

/// Run the bundled schema migrations.
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/// Registry store backed by a PostgreSQL pool.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
    format: IdentifierFormat,
}

impl PgStore {
    pub fn new(pool: PgPool, format: IdentifierFormat) -> Self {
        Self { pool, format }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Database row of `users`.
#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    username: String,
    password_hash: String,
    name: String,
    email: Option<String>,
    phone: Option<String>,
    role: String,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = StoreError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        let role: Role = row
            .role
            .parse()
            .map_err(|e| StoreError::Corrupt(format!("user {}: {e}", row.id)))?;
        Ok(User {
            id: row.id,
            username: row.username,
            password_hash: row.password_hash,
            name: row.name,
            email: row.email,
            phone: row.phone,
            role,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database row of `patients`.
#[derive(Debug, FromRow)]
struct PatientRow {
    id: i64,
    identifier: String,
    qr_token: String,
    full_name: String,
    date_of_birth: Option<NaiveDate>,
    gender: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    guardian_name: Option<String>,
    created_by: Option<i64>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<PatientRow> for Patient {
    fn from(row: PatientRow) -> Self {
        Patient {
            id: row.id,
            identifier: row.identifier,
            qr_token: row.qr_token,
            full_name: row.full_name,
            date_of_birth: row.date_of_birth,
            gender: row.gender,
            phone: row.phone,
            address: row.address,
            guardian_name: row.guardian_name,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn conflict_or_database(err: sqlx::Error, message: impl FnOnce() -> String) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict(message()),
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn get_user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.map(User::try_from).transpose()
    }

    async fn count_users(&self) -> Result<i64, StoreError> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?)
    }

    async fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent account creation so only one signup can observe
        // an empty table. Readers are not blocked.
        sqlx::query("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await?;

        let role = match new.role {
            Some(role) => role,
            None => {
                let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
                    .fetch_one(&mut *tx)
                    .await?;
                assign_role(count, new.bootstrap)
            }
        };

        let row: UserRow = sqlx::query_as(
            "INSERT INTO users (username, password_hash, name, email, phone, role)
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
        )
        .bind(&new.username)
        .bind(&new.password_hash)
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.phone)
        .bind(role.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            conflict_or_database(e, || format!("username '{}' is already taken", new.username))
        })?;

        tx.commit().await?;
        tracing::debug!(user_id = row.id, role = %role, "user row inserted");
        row.try_into()
    }

    async fn update_user(
        &self,
        id: i64,
        update: UserUpdate,
    ) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(
            "UPDATE users SET
                name = COALESCE($2, name),
                email = COALESCE($3, email),
                phone = COALESCE($4, phone),
                password_hash = COALESCE($5, password_hash),
                role = COALESCE($6, role),
                is_active = COALESCE($7, is_active),
                updated_at = NOW()
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(&update.name)
        .bind(&update.email)
        .bind(&update.phone)
        .bind(&update.password_hash)
        .bind(update.role.map(|r| r.as_str()))
        .bind(update.is_active)
        .fetch_optional(&self.pool)
        .await?;
        row.map(User::try_from).transpose()
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let rows: Vec<UserRow> = sqlx::query_as("SELECT * FROM users ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(User::try_from).collect()
    }
}

#[async_trait]
impl PatientStore for PgStore {
    async fn create_patient(&self, new: NewPatient) -> Result<Patient, StoreError> {
        let sequence: i64 = sqlx::query_scalar("SELECT nextval('patient_identifier_seq')")
            .fetch_one(&self.pool)
            .await?;
        let identifier = self.format.issue(sequence as u64);
        let qr_token = issue_qr_token(&identifier);

        let row: PatientRow = sqlx::query_as(
            "INSERT INTO patients
                (identifier, qr_token, full_name, date_of_birth, gender, phone, address,
                 guardian_name, created_by)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING *",
        )
        .bind(identifier.as_str())
        .bind(qr_token.as_str())
        .bind(&new.full_name)
        .bind(new.date_of_birth)
        .bind(&new.gender)
        .bind(&new.phone)
        .bind(&new.address)
        .bind(&new.guardian_name)
        .bind(new.created_by)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            conflict_or_database(e, || format!("patient identifier '{identifier}' already issued"))
        })?;

        tracing::debug!(patient_id = row.id, identifier = %row.identifier, "patient row inserted");
        Ok(row.into())
    }

    async fn get_patient(&self, id: i64) -> Result<Option<Patient>, StoreError> {
        let row: Option<PatientRow> = sqlx::query_as("SELECT * FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Patient::from))
    }

    async fn get_patient_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<Patient>, StoreError> {
        let row: Option<PatientRow> =
            sqlx::query_as("SELECT * FROM patients WHERE identifier = $1")
                .bind(identifier)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Patient::from))
    }

    async fn get_patient_by_qr_token(&self, token: &str) -> Result<Option<Patient>, StoreError> {
        let row: Option<PatientRow> = sqlx::query_as("SELECT * FROM patients WHERE qr_token = $1")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Patient::from))
    }

    async fn update_patient(
        &self,
        id: i64,
        update: PatientUpdate,
    ) -> Result<Option<Patient>, StoreError> {
        let row: Option<PatientRow> = sqlx::query_as(
            "UPDATE patients SET
                full_name = COALESCE($2, full_name),
                date_of_birth = COALESCE($3, date_of_birth),
                gender = COALESCE($4, gender),
                phone = COALESCE($5, phone),
                address = COALESCE($6, address),
                guardian_name = COALESCE($7, guardian_name),
                updated_at = NOW()
             WHERE id = $1 RETURNING *",
        )
        .bind(id)
        .bind(&update.full_name)
        .bind(update.date_of_birth)
        .bind(&update.gender)
        .bind(&update.phone)
        .bind(&update.address)
        .bind(&update.guardian_name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Patient::from))
    }

    async fn list_patients(&self) -> Result<Vec<Patient>, StoreError> {
        let rows: Vec<PatientRow> = sqlx::query_as("SELECT * FROM patients ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Patient::from).collect())
    }
}
