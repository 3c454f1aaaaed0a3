//! Logging: the tracing subscriber and its switchable sink.
//!
//! The process boots logging to the console, then moves to syslog or to the
//! encrypted log file once the mount point is known.
//!
//! # Logging invariants
//!
//! - **No key material** must appear in any log field.
//! - Exactly one sink receives output at any time; the console is the
//!   fallback whenever syslog or the file cannot be opened.
//! - Log level is configurable via `RUST_LOG` (default: `info`, `debug` in
//!   debug mode).

pub mod init;
pub mod sink;

pub use init::{init_logging, LogSwitch};
pub use sink::{Destination, LogChannel, SinkKind};
