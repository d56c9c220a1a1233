//! HTTP surface for the CoreCloud transfer engine.
//!
//! Exposes streaming and WebSocket ingest, range retrieval, sealed secrets
//! and session key issuance over axum. Handlers stay thin: every rule about
//! sealing, commit and cleanup lives in `corecloud-vault`.

pub mod auth;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod upload_session;

pub use auth::{
    Authenticator, TokenAuthenticator, BEARER_COOKIE, SESSION_COOKIE, WRAPPING_KEY_HEADER,
};
pub use config::ServerConfig;
pub use error::ApiError;
pub use state::AppState;
pub use upload_session::{Ack, ControlMessage, UploadSession};

use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use http::StatusCode;
use tracing::{info, warn};

use corecloud_common::Result;
use routes::{files, secrets, tokens, upload};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/api/application-token",
            post(tokens::issue).head(tokens::peek),
        )
        .route("/api/file", post(files::upload).get(files::download))
        .route("/api/file/upload", get(upload::upgrade))
        .route("/api/files", get(files::list))
        .route(
            "/api/secret",
            post(secrets::create)
                .get(secrets::get)
                .delete(secrets::delete),
        )
        .route("/api/secrets", get(secrets::list))
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Open storage, sweep stale pending files, then serve until Ctrl-C.
pub async fn serve(config: ServerConfig) -> Result<()> {
    let state = AppState::open(&config)?;

    match state.engine.sweep_pending(config.pending_grace()).await {
        Ok(report) => info!(
            removed = report.removed,
            retained = report.retained,
            "Start-up sweep finished"
        ),
        Err(e) => warn!(error = %e, "Start-up sweep failed"),
    }

    let listener = tokio::net::TcpListener::bind(config.listen.as_str()).await?;
    info!(listen = %config.listen, "CoreCloud server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    info!("CoreCloud server stopped");
    Ok(())
}
