//! Message-based ingest over a WebSocket.
//!
//! A client sends one `metadata` text message, then every window as a
//! binary frame, then a `complete` text message. Each message is answered
//! with an [`Ack`]. The session owns the ingest cursor for the lifetime of
//! the connection; the socket task drives it and aborts it if the
//! connection ends early.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::public_message;
use corecloud_common::{Category, Error, FileId, LocationId, OwnerId, Result};
use corecloud_crypto::WrappingKey;
use corecloud_vault::{decode_checksum, IngestCursor, IngestRequest, TransferEngine};

/// Text message sent by an uploading client.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    Metadata {
        name: String,
        kind: String,
        size: u64,
        /// Base64 SHA-512 of the plaintext.
        checksum: String,
        category: Category,
        #[serde(rename = "locationId")]
        location_id: LocationId,
    },
    Complete,
}

impl ControlMessage {
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::Validation(format!("Malformed control message: {}", e)))
    }
}

/// Reply to each client message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Ack {
    Metadata,
    Chunk,
    Ok { id: FileId },
    Error { message: String },
}

impl Ack {
    pub fn error(err: &Error) -> Self {
        Ack::Error {
            message: public_message(err),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}

enum Phase {
    AwaitingMetadata,
    Receiving(IngestCursor),
    Finished,
}

/// Per-connection upload state.
pub struct UploadSession {
    engine: TransferEngine,
    owner: OwnerId,
    wrapping_key: WrappingKey,
    phase: Phase,
}

impl UploadSession {
    pub fn new(engine: TransferEngine, owner: OwnerId, wrapping_key: WrappingKey) -> Self {
        Self {
            engine,
            owner,
            wrapping_key,
            phase: Phase::AwaitingMetadata,
        }
    }

    /// Whether the upload committed or failed. A finished session accepts
    /// no further messages.
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished)
    }

    /// Handle a text frame.
    ///
    /// # Errors
    /// Any error finishes the session; a started ingest has already been
    /// purged when this returns.
    pub async fn on_text(&mut self, text: &str) -> Result<Ack> {
        let message = match ControlMessage::parse(text) {
            Ok(message) => message,
            Err(e) => return Err(self.fail(e).await),
        };

        match (std::mem::replace(&mut self.phase, Phase::Finished), message) {
            (
                Phase::AwaitingMetadata,
                ControlMessage::Metadata {
                    name,
                    kind,
                    size,
                    checksum,
                    category,
                    location_id,
                },
            ) => {
                let request = IngestRequest {
                    name,
                    kind,
                    size,
                    checksum: decode_checksum(&checksum)?,
                    category,
                    location_id,
                };
                let cursor = self
                    .engine
                    .begin_ingest(&self.owner, request, &self.wrapping_key)
                    .await?;
                debug!(file_id = %cursor.file_id(), owner = %self.owner, "Upload session started");
                self.phase = Phase::Receiving(cursor);
                Ok(Ack::Metadata)
            }
            (Phase::Receiving(cursor), ControlMessage::Complete) => {
                let id = cursor.commit().await?;
                Ok(Ack::Ok { id })
            }
            (Phase::Receiving(cursor), ControlMessage::Metadata { .. }) => {
                Err(cursor.fail(violation("Duplicate metadata message")).await)
            }
            (Phase::AwaitingMetadata, ControlMessage::Complete) => {
                Err(violation("Complete before metadata"))
            }
            (Phase::Finished, _) => Err(violation("Message after the upload finished")),
        }
    }

    /// Handle a binary frame: exactly one plaintext window.
    ///
    /// # Errors
    /// As for [`UploadSession::on_text`].
    pub async fn on_binary(&mut self, frame: &[u8]) -> Result<Ack> {
        match std::mem::replace(&mut self.phase, Phase::Finished) {
            Phase::Receiving(mut cursor) => match cursor.push_window(frame).await {
                Ok(()) => {
                    self.phase = Phase::Receiving(cursor);
                    Ok(Ack::Chunk)
                }
                Err(e) => Err(cursor.fail(e).await),
            },
            Phase::AwaitingMetadata => Err(violation("Binary frame before metadata")),
            Phase::Finished => Err(violation("Binary frame after the upload finished")),
        }
    }

    /// End the session without committing, purging any started ingest.
    pub async fn abort(&mut self) {
        if let Phase::Receiving(cursor) = std::mem::replace(&mut self.phase, Phase::Finished) {
            warn!(
                file_id = %cursor.file_id(),
                owner = %self.owner,
                path = %cursor.path(),
                received = cursor.received(),
                "Upload ended before completion"
            );
            cursor.abort().await;
        }
    }

    async fn fail(&mut self, err: Error) -> Error {
        self.abort().await;
        err
    }
}

fn violation(message: &str) -> Error {
    Error::Validation(format!("Upload protocol violation: {}", message))
}
