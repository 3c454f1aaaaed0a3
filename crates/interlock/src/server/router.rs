//! Handler registration and Axum router construction.

use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::{handler::HandlerWithoutStateExt, routing::get, Router};
use thiserror::Error;
use tower_http::{
    compression::CompressionLayer, services::ServeDir, timeout::TimeoutLayer, trace::TraceLayer,
};

use super::{handlers, state::AppState};

/// Per-request timeout applied to every route, static files included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Failure to register the HTTP handlers.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("static path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("could not open static path {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Validate `static_path` and build the router serving it.
///
/// # Errors
///
/// Returns [`RegistrationError`] if `static_path` is missing or not a directory.
pub fn register_handlers(static_path: &Path, state: AppState) -> Result<Router, RegistrationError> {
    let meta = std::fs::metadata(static_path).map_err(|source| RegistrationError::Io {
        path: static_path.to_path_buf(),
        source,
    })?;
    if !meta.is_dir() {
        return Err(RegistrationError::NotADirectory(static_path.to_path_buf()));
    }
    Ok(build(static_path, state))
}

/// Build the application [`Router`]: status route, static fallback, then
/// tracing, timeout and compression layers.
pub fn build(static_path: &Path, state: AppState) -> Router {
    let static_files = ServeDir::new(static_path).not_found_service(handlers::not_found.into_service());

    Router::new()
        .route("/api/status", get(handlers::status))
        .fallback_service(static_files)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn static_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>interlock</h1>").unwrap();
        dir
    }

    #[tokio::test]
    async fn unknown_route_returns_404() {
        let dir = static_dir();
        let app = build(dir.path(), AppState::default());
        let req = Request::builder()
            .uri("/unknown")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn status_route_exists() {
        let dir = static_dir();
        let app = build(dir.path(), AppState::default());
        let req = Request::builder()
            .uri("/api/status")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn static_files_are_served() {
        let dir = static_dir();
        let app = build(dir.path(), AppState::default());
        let req = Request::builder()
            .uri("/index.html")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[test]
    fn missing_static_path_fails_registration() {
        let dir = tempfile::tempdir().unwrap();
        let err = register_handlers(&dir.path().join("absent"), AppState::default()).unwrap_err();
        assert!(matches!(err, RegistrationError::Io { .. }));
    }

    #[test]
    fn file_as_static_path_fails_registration() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let err = register_handlers(f.path(), AppState::default()).unwrap_err();
        assert!(matches!(err, RegistrationError::NotADirectory(_)));
    }
}
