//! # Identity issuance
//!
//! Rules applied exactly once, when an account or a patient is created:
//!
//! - [`assign_role`]: the first account in an empty registry (or one that flags
//!   itself as the bootstrap account) becomes admin, everyone else a health worker.
//!   Stores call it inside the same critical section as the insert, so two
//!   concurrent signups against an empty registry cannot both see a count of zero.
//! - [`IdentifierFormat::issue`]: turns a store-provided sequence number into a
//!   human-readable patient identifier such as `RH000042`.
//! - [`issue_qr_token`]: mints the opaque token encoded in a patient's QR card.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::models::Role;

/// Role for a new account, given how many accounts already exist.
pub fn assign_role(existing_user_count: i64, bootstrap: bool) -> Role {
    if existing_user_count == 0 || bootstrap {
        Role::Admin
    } else {
        Role::HealthWorker
    }
}

/// Human-readable external key of a patient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatientIdentifier(String);

impl PatientIdentifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PatientIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prefix and zero-padding used for patient identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierFormat {
    pub prefix: String,
    pub digits: usize,
}

impl Default for IdentifierFormat {
    fn default() -> Self {
        Self {
            prefix: "RH".to_string(),
            digits: 6,
        }
    }
}

impl IdentifierFormat {
    pub fn new(prefix: impl Into<String>, digits: usize) -> Self {
        Self {
            prefix: prefix.into(),
            digits,
        }
    }

    /// Format `sequence` as an identifier. Sequences wider than `digits` are
    /// written in full, never truncated.
    pub fn issue(&self, sequence: u64) -> PatientIdentifier {
        PatientIdentifier(format!(
            "{}{:0width$}",
            self.prefix,
            sequence,
            width = self.digits
        ))
    }
}

/// Opaque payload of a patient's QR card.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QrToken(String);

impl QrToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for QrToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mint the QR token for the patient holding `identifier`.
///
/// The identifier prefix binds the token to exactly one patient; the 128 random
/// bits make it unguessable from the identifier alone.
pub fn issue_qr_token(identifier: &PatientIdentifier) -> QrToken {
    let mut nonce = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut nonce);
    QrToken(format!("{}.{}", identifier, hex::encode(nonce)))
}
