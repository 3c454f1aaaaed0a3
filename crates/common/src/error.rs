//! Common error types shared across crates.

use thiserror::Error;

/// Error surfaced to HTTPS callers.
///
/// Variants map to HTTP status codes returned to callers:
/// - [`ServiceError::NotFound`] → 404
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The requested path does not exist under the static root or API.
    #[error("not found: {0}")]
    NotFound(String),
}

impl ServiceError {
    /// Returns the HTTP status code that should be sent for this error.
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceError::NotFound(_) => 404,
        }
    }

    /// Short machine-readable code used in [`crate::protocol::ErrorResponse`].
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
        }
    }
}
