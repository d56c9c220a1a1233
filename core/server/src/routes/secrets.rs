//! Sealed secrets.

use axum::extract::{Query, State};
use axum::Json;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::files::Created;
use crate::auth::{Owner, SessionKey};
use crate::error::ApiError;
use crate::state::AppState;
use corecloud_common::{Error, SecretId};
use corecloud_vault::{NewSecret, SecretKind, SecretSummary};

#[derive(Deserialize)]
pub struct NewSecretBody {
    pub label: String,
    pub kind: SecretKind,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Base64 plaintext payload.
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct SecretParams {
    pub id: SecretId,
}

#[derive(Serialize)]
pub struct SecretPayload {
    pub payload: String,
}

/// `POST /api/secret`
pub async fn create(
    State(state): State<AppState>,
    Owner(owner): Owner,
    SessionKey(wrapping_key): SessionKey,
    Json(body): Json<NewSecretBody>,
) -> Result<(StatusCode, Json<Created>), ApiError> {
    let encoded = Zeroizing::new(body.payload);
    let payload = Zeroizing::new(
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(|_| Error::Validation("Secret payload is not base64".to_string()))?,
    );
    let meta = NewSecret {
        label: body.label,
        kind: body.kind,
        username: body.username,
        notes: body.notes,
    };

    let id = state
        .secrets
        .add_secret(&owner, meta, &payload, &wrapping_key)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(Created { id: id.to_string() }),
    ))
}

/// `GET /api/secret`
pub async fn get(
    State(state): State<AppState>,
    Owner(owner): Owner,
    SessionKey(wrapping_key): SessionKey,
    Query(params): Query<SecretParams>,
) -> Result<Json<SecretPayload>, ApiError> {
    let secret = state
        .secrets
        .get_secret(&params.id, &owner, &wrapping_key)
        .await?;
    Ok(Json(SecretPayload {
        payload: STANDARD.encode(secret.as_bytes()),
    }))
}

/// `GET /api/secrets`
pub async fn list(
    State(state): State<AppState>,
    Owner(owner): Owner,
) -> Result<Json<Vec<SecretSummary>>, ApiError> {
    Ok(Json(state.secrets.list_secrets(&owner).await?))
}

/// `DELETE /api/secret`
pub async fn delete(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Query(params): Query<SecretParams>,
) -> Result<StatusCode, ApiError> {
    state.secrets.delete_secret(&params.id, &owner).await?;
    Ok(StatusCode::NO_CONTENT)
}
