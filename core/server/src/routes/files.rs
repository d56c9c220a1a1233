//! Streaming ingest, range retrieval and listing of files.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{StreamExt, TryStreamExt};
use http::{header, HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use std::io;

use crate::auth::{Owner, SessionKey};
use crate::error::ApiError;
use crate::state::AppState;
use corecloud_common::{Category, Error, FileId, LocationId};
use corecloud_vault::{decode_checksum, FileFilter, FileSummary, IngestRequest, RangeSpec};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    pub name: String,
    pub kind: String,
    pub size: u64,
    pub checksum: String,
    pub category: Category,
    pub location_id: LocationId,
}

#[derive(Debug, Serialize)]
pub struct Created {
    pub id: String,
}

/// `POST /api/file`: the request body is the raw plaintext.
///
/// The ingest runs in its own task so that a client disconnect, which drops
/// this handler, still lets the ingest purge what it wrote.
pub async fn upload(
    State(state): State<AppState>,
    Owner(owner): Owner,
    SessionKey(wrapping_key): SessionKey,
    Query(params): Query<UploadParams>,
    body: Body,
) -> Result<(StatusCode, Json<Created>), ApiError> {
    let request = IngestRequest {
        name: params.name,
        kind: params.kind,
        size: params.size,
        checksum: decode_checksum(&params.checksum)?,
        category: params.category,
        location_id: params.location_id,
    };
    let stream = body
        .into_data_stream()
        .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::ConnectionAborted, e)))
        .boxed();

    let engine = state.engine.clone();
    let id = tokio::spawn(async move {
        engine
            .ingest_stream(&owner, request, &wrapping_key, stream)
            .await
    })
    .await
    .map_err(|e| Error::Storage(format!("Ingest task failed: {}", e)))??;

    Ok((
        StatusCode::CREATED,
        Json(Created { id: id.to_string() }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct DownloadParams {
    pub id: FileId,
    pub category: Category,
}

/// `GET /api/file`: stream a committed file, honouring a single `Range`.
pub async fn download(
    State(state): State<AppState>,
    Owner(owner): Owner,
    SessionKey(wrapping_key): SessionKey,
    Query(params): Query<DownloadParams>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let range = match headers.get(header::RANGE) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| Error::Validation("Malformed range header".to_string()))?;
            Some(RangeSpec::parse_header(value)?)
        }
        None => None,
    };

    let retrieval = state
        .engine
        .open_retrieval(&owner, &params.id, &params.category, range, &wrapping_key)
        .await?;

    let status = if retrieval.range().is_some() {
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, retrieval.content_type())
        .header(header::CONTENT_LENGTH, retrieval.content_length())
        .header(header::ACCEPT_RANGES, "bytes");
    if let Some(content_range) = retrieval.content_range() {
        builder = builder.header(header::CONTENT_RANGE, content_range);
    }

    builder
        .body(Body::from_stream(retrieval.into_body()))
        .map_err(|e| ApiError(Error::Serialization(e.to_string())))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub category: Option<Category>,
    pub location_id: Option<LocationId>,
    pub kind: Option<String>,
}

/// `GET /api/files`: committed files of the caller.
pub async fn list(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Query(params): Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = FileFilter {
        category: params.category,
        location_id: params.location_id,
        kind: params.kind,
    };
    let files: Vec<FileSummary> = state.engine.list_files(&owner, &filter).await?;
    Ok(Json(files))
}
