//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use crate::config::Config;
use crate::telemetry::LogChannel;

/// Application state shared across all request handlers.
///
/// Cheap to clone: the configuration is frozen behind an `Arc` once serving
/// begins, and [`LogChannel`] is itself a shared handle.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Read-only configuration, never mutated after startup.
    pub config: Arc<Config>,
    /// Active log sink, for handlers that report where diagnostics go.
    pub log: LogChannel,
}

impl AppState {
    /// Create a new [`AppState`] from the frozen configuration and log handle.
    pub fn new(config: Arc<Config>, log: LogChannel) -> Self {
        Self { config, log }
    }
}

impl Default for AppState {
    /// Default configuration logging to stdout, suitable for tests.
    fn default() -> Self {
        Self::new(Arc::new(Config::default()), LogChannel::console())
    }
}
