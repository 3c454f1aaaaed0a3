//! Refuse to run with administrative privileges.
//!
//! The service decrypts storage and serves it over the network; a compromise
//! must not inherit root. This check runs before any file, network or
//! environment operation.

use nix::unistd::{geteuid, Uid};
use thiserror::Error;

/// Errors produced by the privilege guard.
#[derive(Debug, Error)]
pub enum PrivilegeError {
    /// The effective uid is root.
    #[error("please do not run this application with administrative privileges (euid {0})")]
    Elevated(Uid),
}

/// Check the effective identity of the current process.
///
/// # Errors
///
/// Returns [`PrivilegeError::Elevated`] when running as root.
pub fn ensure_unprivileged() -> Result<(), PrivilegeError> {
    check(geteuid())
}

/// Check a given effective uid.
pub fn check(euid: Uid) -> Result<(), PrivilegeError> {
    if euid.is_root() {
        return Err(PrivilegeError::Elevated(euid));
    }
    Ok(())
}
