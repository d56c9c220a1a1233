//! Session wrapping key issuance.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{header, HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::info;
use zeroize::Zeroizing;

use crate::auth::{self, Owner, SESSION_COOKIE};
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub master_password: String,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// `POST /api/application-token`: unlock the master key and hand back the
/// derived session wrapping key, both as a cookie and in the body.
pub async fn issue(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(request): Json<TokenRequest>,
) -> Result<Response, ApiError> {
    let master_password = Zeroizing::new(request.master_password);
    let wrapping_key = state
        .keys
        .open_session(&owner, master_password.as_bytes())
        .await?;

    info!(owner = %owner, "Application token issued");
    let cookie = auth::session_cookie(&wrapping_key, state.secure_cookies);
    let body = TokenResponse {
        token: wrapping_key.to_base64(),
    };
    Ok((
        StatusCode::CREATED,
        [(header::SET_COOKIE, cookie)],
        Json(body),
    )
        .into_response())
}

/// `HEAD /api/application-token`: 200 if the caller presents a session
/// cookie, 204 otherwise.
pub async fn peek(Owner(_owner): Owner, headers: HeaderMap) -> StatusCode {
    if auth::cookie(&headers, SESSION_COOKIE).is_some() {
        StatusCode::OK
    } else {
        StatusCode::NO_CONTENT
    }
}
