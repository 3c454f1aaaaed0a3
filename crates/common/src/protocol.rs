//! Request and response types exposed on the HTTPS API.
//!
//! Serialised as JSON. Nothing in here may carry key material: only flags,
//! identifiers and human-readable messages.

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

// ---------------------------------------------------------------------------
// Error response
// ---------------------------------------------------------------------------

/// Standard error response body returned on any non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Short machine-readable error code (e.g. `"not_found"`).
    pub code: String,
    /// Human-readable description safe to expose to callers.
    pub message: String,
}

impl ErrorResponse {
    /// Construct an [`ErrorResponse`] from a code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl From<&ServiceError> for ErrorResponse {
    fn from(err: &ServiceError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Response body for `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Always `"ok"` once the listener is serving.
    pub status: String,
    /// Service version string.
    pub version: String,
    /// `true` when authentication is disabled by the test mode switch.
    pub test_mode: bool,
    /// `true` when every connection must present a verified client certificate.
    pub mutual_tls: bool,
    /// Name of the active log sink (`console`, `syslog` or `file`).
    pub log_sink: String,
    /// Cipher identifiers enabled at startup.
    pub ciphers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_from_service_error() {
        let e = ErrorResponse::from(&ServiceError::NotFound("/nope".into()));
        assert_eq!(e.code, "not_found");
        assert!(e.message.contains("/nope"));
    }

    #[test]
    fn status_response_serde() {
        let s = StatusResponse {
            status: "ok".into(),
            version: "0.1.0".into(),
            test_mode: false,
            mutual_tls: true,
            log_sink: "syslog".into(),
            ciphers: vec!["OpenPGP".into()],
        };
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["mutual_tls"], true);
        assert_eq!(json["ciphers"][0], "OpenPGP");
    }
}
