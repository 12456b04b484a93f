//! Patient routes. Mounted behind `require_authenticated`.
//!
//! Identifiers and QR tokens are issued by the store on creation; update
//! payloads carrying them are rejected by the JSON extractor.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use store::{NewPatient, Patient, PatientStore, PatientUpdate};
use tower_sessions::Session;

use super::auth::{optional, required};
use crate::auth::{session, CurrentUser};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/patients", get(list_patients).post(create_patient))
        .route("/api/patients/{id}", get(get_patient).patch(update_patient))
        .route("/api/patients/{id}/qr", get(qr_payload))
        .route(
            "/api/patients/identifier/{identifier}",
            get(get_by_identifier),
        )
        .route("/api/patients/qr/{token}", get(get_by_qr_token))
}

/// What a client needs to render a patient's QR card.
#[derive(Debug, Serialize)]
pub struct QrPayload {
    pub identifier: String,
    pub qr_token: String,
}

fn not_found(what: impl std::fmt::Display) -> AppError {
    AppError::NotFound(format!("patient {what}"))
}

async fn create_patient(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    session: Session,
    Json(mut new): Json<NewPatient>,
) -> Result<(StatusCode, Json<Patient>), AppError> {
    new.full_name = required("full_name", &new.full_name)?;
    new.gender = optional(new.gender);
    new.phone = optional(new.phone);
    new.address = optional(new.address);
    new.guardian_name = optional(new.guardian_name);
    new.created_by = Some(user.id);

    let patient = state.store.create_patient(new).await?;

    session::touch(&session, state.session_ttl);
    tracing::info!(
        patient_id = patient.id,
        identifier = %patient.identifier,
        created_by = user.id,
        "patient registered"
    );

    Ok((StatusCode::CREATED, Json(patient)))
}

async fn list_patients(State(state): State<AppState>) -> Result<Json<Vec<Patient>>, AppError> {
    Ok(Json(state.store.list_patients().await?))
}

async fn get_patient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Patient>, AppError> {
    state
        .store
        .get_patient(id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(id))
}

async fn get_by_identifier(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<Patient>, AppError> {
    state
        .store
        .get_patient_by_identifier(&identifier)
        .await?
        .map(Json)
        .ok_or_else(|| not_found(&identifier))
}

async fn get_by_qr_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<Patient>, AppError> {
    state
        .store
        .get_patient_by_qr_token(&token)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no patient for this QR code".into()))
}

async fn qr_payload(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<QrPayload>, AppError> {
    let patient = state.store.get_patient(id).await?.ok_or_else(|| not_found(id))?;
    Ok(Json(QrPayload {
        identifier: patient.identifier,
        qr_token: patient.qr_token,
    }))
}

async fn update_patient(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    session: Session,
    Path(id): Path<i64>,
    Json(mut update): Json<PatientUpdate>,
) -> Result<Json<Patient>, AppError> {
    update.full_name = update
        .full_name
        .as_deref()
        .map(|n| required("full_name", n))
        .transpose()?;

    let patient = state
        .store
        .update_patient(id, update)
        .await?
        .ok_or_else(|| not_found(id))?;

    session::touch(&session, state.session_ttl);
    tracing::info!(patient_id = id, updated_by = user.id, "patient updated");

    Ok(Json(patient))
}
