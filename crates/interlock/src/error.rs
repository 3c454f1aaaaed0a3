//! Top-level error type of the bootstrap sequence.
//!
//! Every stage returns its own error; they meet here so that `main` can
//! report the failing stage in one line and exit.
//!
//! Log sink failures never get here: the console takes over and startup
//! continues (see [`crate::telemetry::LogSwitch::switch`]).

use thiserror::Error;

use crate::config::{ConfigError, MountResolutionError, UnsupportedCipherError};
use crate::privilege::PrivilegeError;
use crate::sandbox::SandboxError;
use crate::server::launcher::LaunchError;
use crate::server::router::RegistrationError;

/// Coarse classification used for exit diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Startup cannot continue; nothing has been exposed on the network.
    FatalStartup,
    /// The listener failed after serving began.
    RuntimeServe,
}

#[derive(Debug, Error)]
pub enum InterlockError {
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error("could not change to the executable directory: {0}")]
    WorkDir(#[source] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Mount(#[from] MountResolutionError),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Cipher(#[from] UnsupportedCipherError),

    #[error(transparent)]
    Handlers(#[from] RegistrationError),

    #[error(transparent)]
    Launch(#[from] LaunchError),

    #[error("could not start the async runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

impl InterlockError {
    /// Name of the bootstrap stage that failed.
    pub fn stage(&self) -> &'static str {
        match self {
            InterlockError::Privilege(_) => "privilege check",
            InterlockError::WorkDir(_) => "working directory",
            InterlockError::Config(_) => "configuration",
            InterlockError::Mount(_) => "mount point",
            InterlockError::Sandbox(_) => "temporary directory",
            InterlockError::Cipher(_) => "cipher setup",
            InterlockError::Handlers(_) => "handler registration",
            InterlockError::Launch(e) => e.stage(),
            InterlockError::Runtime(_) => "async runtime",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            InterlockError::Launch(LaunchError::Accept(_)) => ErrorClass::RuntimeServe,
            _ => ErrorClass::FatalStartup,
        }
    }

    /// The single line reported before the process exits.
    pub fn diagnostic(&self) -> String {
        format!("{} failed ({:?}): {self}", self.stage(), self.class())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Uid;

    #[test]
    fn accept_failure_is_runtime() {
        let err = InterlockError::from(LaunchError::Accept(std::io::Error::other("boom")));
        assert_eq!(err.class(), ErrorClass::RuntimeServe);
        assert_eq!(err.stage(), "serve");
    }

    #[test]
    fn privilege_failure_is_fatal_startup() {
        let err = InterlockError::from(PrivilegeError::Elevated(Uid::from_raw(0)));
        assert_eq!(err.class(), ErrorClass::FatalStartup);
        assert_eq!(err.stage(), "privilege check");
        assert!(err.to_string().contains("administrative privileges"));
        assert!(err
            .diagnostic()
            .starts_with("privilege check failed (FatalStartup): please do not run"));
    }

    #[test]
    fn cipher_failure_names_the_cipher() {
        let err = InterlockError::from(UnsupportedCipherError { id: "ROT13".into() });
        assert_eq!(err.stage(), "cipher setup");
        assert!(err.to_string().contains("ROT13"));
    }
}
