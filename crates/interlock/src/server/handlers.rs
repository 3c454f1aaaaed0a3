//! Axum request handlers owned by the bootstrap layer.
//!
//! File management routes are registered by the application on top of these.

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use common::protocol::{ErrorResponse, StatusResponse};
use common::ServiceError;

use super::state::AppState;

/// `GET /api/status` — liveness plus the non-secret runtime settings.
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let cfg = &state.config;
    Json(StatusResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        test_mode: cfg.test_mode,
        mutual_tls: cfg.tls_client_ca.is_some(),
        log_sink: state.log.kind().to_string(),
        ciphers: cfg.enabled_ciphers().to_vec(),
    })
}

/// Catch-all 404 handler for paths outside the API and static root.
pub async fn not_found(uri: Uri) -> Response {
    error_response(&ServiceError::NotFound(uri.path().to_owned()))
}

/// Render a [`ServiceError`] as a JSON body with the matching status code.
pub fn error_response(err: &ServiceError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(ErrorResponse::from(err))).into_response()
}
