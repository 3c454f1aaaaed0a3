//! Axum HTTPS server, routing, and the TLS listener lifecycle.
//!
//! # Responsibilities
//! - Build the rustls configuration, with mandatory client certificates when
//!   a client CA bundle is configured.
//! - Register the handlers on an Axum router.
//! - Bind the listener and drive the accept/serve loop.

pub mod handlers;
pub mod launcher;
pub mod router;
pub mod state;
pub mod tls;
