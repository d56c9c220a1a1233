//! Caller identity and session wrapping keys.
//!
//! Every API route resolves an owner from the `Authorization: Bearer` header,
//! or from the [`BEARER_COOKIE`] when the header is absent, through an
//! [`Authenticator`]. Browser WebSocket clients cannot set headers, so the
//! upload socket relies on the cookie. Routes touching sealed content additionally
//! need the session wrapping key, which the caller presents either in the
//! application token cookie or in the `X-Wrapping-Key` header. The server
//! never stores that key.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use http::request::Parts;
use http::{header, HeaderMap};
use std::collections::{BTreeMap, HashMap};

use crate::error::ApiError;
use crate::state::AppState;
use corecloud_common::{Error, OwnerId, Result};
use corecloud_crypto::WrappingKey;

/// Cookie carrying the bearer credential for clients that cannot set headers.
pub const BEARER_COOKIE: &str = "CoreCloudServerJWT";

/// Cookie carrying the base64 session wrapping key.
pub const SESSION_COOKIE: &str = "CoreCloudServerApplicationToken";

/// Header alternative to [`SESSION_COOKIE`].
pub const WRAPPING_KEY_HEADER: &str = "x-wrapping-key";

/// Resolves a bearer credential to an owner.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// # Errors
    /// - `Error::Auth` if the credential is unknown
    async fn authenticate(&self, bearer: &str) -> Result<OwnerId>;
}

/// Authenticator backed by a fixed token table.
#[derive(Debug, Clone, Default)]
pub struct TokenAuthenticator {
    tokens: HashMap<String, OwnerId>,
}

impl TokenAuthenticator {
    pub fn new(tokens: BTreeMap<String, OwnerId>) -> Self {
        Self {
            tokens: tokens.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, bearer: &str) -> Result<OwnerId> {
        self.tokens
            .get(bearer)
            .cloned()
            .ok_or_else(|| Error::Auth("Unknown bearer token".to_string()))
    }
}

/// The authenticated owner of a request.
#[derive(Debug, Clone)]
pub struct Owner(pub OwnerId);

impl FromRequestParts<AppState> for Owner {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        let bearer = bearer_token(&parts.headers)?;
        let owner = state.auth.authenticate(bearer).await?;
        Ok(Owner(owner))
    }
}

/// The session wrapping key presented with a request.
#[derive(Debug)]
pub struct SessionKey(pub WrappingKey);

impl FromRequestParts<AppState> for SessionKey {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &AppState,
    ) -> std::result::Result<Self, Self::Rejection> {
        Ok(SessionKey(wrapping_key(&parts.headers)?))
    }
}

/// Extract the credential from `Authorization: Bearer <token>`, or from the
/// [`BEARER_COOKIE`] when no `Authorization` header is sent.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let Some(value) = headers.get(header::AUTHORIZATION) else {
        return match cookie(headers, BEARER_COOKIE) {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(Error::Auth("Missing authorization header".to_string())),
        };
    };
    let value = value
        .to_str()
        .map_err(|_| Error::Auth("Malformed authorization header".to_string()))?;
    match value.split_once(' ') {
        Some((scheme, token))
            if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() =>
        {
            Ok(token.trim())
        }
        _ => Err(Error::Auth("Expected a bearer token".to_string())),
    }
}

/// Find the wrapping key in the session cookie, falling back to the header.
pub fn wrapping_key(headers: &HeaderMap) -> Result<WrappingKey> {
    if let Some(value) = cookie(headers, SESSION_COOKIE) {
        return WrappingKey::from_base64(value);
    }
    match headers.get(WRAPPING_KEY_HEADER) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| Error::Auth("Malformed wrapping key".to_string()))?;
            WrappingKey::from_base64(value)
        }
        None => Err(Error::Auth("Missing wrapping key".to_string())),
    }
}

/// Value of a named cookie across every `Cookie` header.
pub(crate) fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim_matches('"'))
}

/// `Set-Cookie` value handing a wrapping key to the caller.
pub fn session_cookie(wrapping_key: &WrappingKey, secure: bool) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; HttpOnly",
        SESSION_COOKIE,
        wrapping_key.to_base64()
    );
    if secure {
        cookie.push_str("; SameSite=Lax; Secure");
    }
    cookie
}
