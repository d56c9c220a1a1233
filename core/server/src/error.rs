//! Mapping of engine errors onto HTTP responses.

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{header, HeaderValue, StatusCode};
use serde_json::json;
use tracing::{debug, error};

use corecloud_common::Error;

/// An engine error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

/// HTTP status for an engine error.
pub fn status_of(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) | Error::IntegrityMismatch(_) => StatusCode::BAD_REQUEST,
        Error::Auth(_) | Error::Crypto(_) => StatusCode::UNAUTHORIZED,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
        Error::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Storage(_) | Error::Io(_) | Error::Serialization(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Text safe to hand to the caller.
///
/// Crypto failures are reported like any other authorization failure, and
/// service faults carry no detail.
pub fn public_message(err: &Error) -> String {
    match err {
        Error::Crypto(_) => "Unauthorized".to_string(),
        Error::Storage(_) | Error::Io(_) | Error::Serialization(_) => {
            "Internal server error".to_string()
        }
        Error::Database(_) => "Service unavailable".to_string(),
        other => other.to_string(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_of(&err);
        if status.is_server_error() {
            error!(error = %err, "Request failed");
        } else {
            debug!(error = %err, status = status.as_u16(), "Request rejected");
        }

        let mut response = (status, Json(json!({ "error": public_message(&err) }))).into_response();
        if let Error::RangeNotSatisfiable { size } = err {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_status_mapping() {
        let cases = [
            (Error::Validation("x".into()), StatusCode::BAD_REQUEST),
            (Error::IntegrityMismatch("x".into()), StatusCode::BAD_REQUEST),
            (Error::Auth("x".into()), StatusCode::UNAUTHORIZED),
            (Error::Crypto("x".into()), StatusCode::UNAUTHORIZED),
            (Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                Error::RangeNotSatisfiable { size: 3 },
                StatusCode::RANGE_NOT_SATISFIABLE,
            ),
            (Error::Database("x".into()), StatusCode::SERVICE_UNAVAILABLE),
            (Error::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (
                Error::Io(std::io::Error::other("x")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(status_of(&err), status, "{:?}", err);
        }
    }

    #[tokio::test]
    async fn test_range_error_carries_size() {
        let response = ApiError(Error::RangeNotSatisfiable { size: 42 }).into_response();
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */42");
    }

    #[tokio::test]
    async fn test_internal_detail_not_exposed() {
        let response = ApiError(Error::Crypto("tag mismatch in window 3".into())).into_response();
        let text = body_text(response).await;
        assert!(!text.contains("window 3"));

        let response =
            ApiError(Error::Storage("/srv/blobs/abc.sealedbox: EIO".into())).into_response();
        let text = body_text(response).await;
        assert!(!text.contains("/srv/blobs"));
        assert!(text.contains("Internal server error"));
    }
}
