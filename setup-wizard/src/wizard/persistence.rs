// Persisted entry codec
//
// The stored blob is a small JSON envelope around the form state. Anything that does not parse
// into the current schema is "malformed" and the caller falls back to defaults.

use crate::models::form::WizardFormState;
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PersistedEntryOut<'a> {
    schema_version: u32,
    saved_at_utc: String,
    state: &'a WizardFormState,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedEntryIn {
    schema_version: u32,
    #[serde(default)]
    #[allow(dead_code)]
    saved_at_utc: Option<String>,
    state: WizardFormState,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("persisted entry is not valid JSON for the form schema: {0}")]
    Json(#[from] serde_json::Error),
    #[error("persisted entry has unsupported schema version {0}")]
    UnsupportedVersion(u32),
}

pub fn encode_entry(state: &WizardFormState) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&PersistedEntryOut {
        schema_version: SCHEMA_VERSION,
        saved_at_utc: chrono::Utc::now().to_rfc3339(),
        state,
    })
}

pub fn decode_entry(bytes: &[u8]) -> Result<WizardFormState, DecodeError> {
    let entry: PersistedEntryIn = serde_json::from_slice(bytes)?;
    if entry.schema_version != SCHEMA_VERSION {
        return Err(DecodeError::UnsupportedVersion(entry.schema_version));
    }
    Ok(entry.state)
}
