//! Confine temporary files to the encrypted mount point.
//!
//! Anything in the process that asks for a temporary directory (libraries,
//! `std::env::temp_dir`, child processes) must land on encrypted storage, never
//! on the default `/tmp` which may be swap backed or world readable.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::config::Config;

/// Environment variable consulted for the temporary directory.
pub const TMPDIR_VAR: &str = "TMPDIR";

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The sandbox step ran before the mount point was resolved.
    #[error("mount point must be resolved before confining temporary files")]
    Unresolved,

    /// The environment did not take the new value.
    #[error("temporary directory is {} after rebinding, expected {}", actual.display(), expected.display())]
    NotApplied { expected: PathBuf, actual: PathBuf },
}

/// Point `TMPDIR` at the resolved mount point of `cfg`.
///
/// # Errors
///
/// Returns [`SandboxError::Unresolved`] if [`Config::set_mount_point`] has not
/// succeeded yet.
pub fn confine_tmpdir(cfg: &Config) -> Result<PathBuf, SandboxError> {
    let mount_point = cfg.resolved_mount_point().ok_or(SandboxError::Unresolved)?;
    rebind_tmpdir(mount_point)
}

fn rebind_tmpdir(dir: &Path) -> Result<PathBuf, SandboxError> {
    // Single-threaded at this point: `main` builds the async runtime only
    // after bootstrap.
    std::env::set_var(TMPDIR_VAR, dir);

    let actual = std::env::temp_dir();
    if actual != dir {
        return Err(SandboxError::NotApplied {
            expected: dir.to_path_buf(),
            actual,
        });
    }
    debug!(tmpdir = %dir.display(), "temporary directory confined");
    Ok(actual)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{persistent_dir, TmpdirGuard};
    use serial_test::serial;

    #[test]
    #[serial(tmpdir)]
    fn tmpdir_follows_mount_point() {
        let _restore = TmpdirGuard::capture();
        let mut cfg = Config::default();
        cfg.mount_point = Some(persistent_dir("sandbox-mount"));
        cfg.set_mount_point().unwrap();

        let confined = confine_tmpdir(&cfg).unwrap();
        let expected = cfg.resolved_mount_point().unwrap();
        assert_eq!(confined, expected);
        assert_eq!(std::env::var_os(TMPDIR_VAR).unwrap(), expected.as_os_str());
        assert_eq!(std::env::temp_dir(), expected);

        // Libraries asking for a scratch file now land on the mount point.
        let scratch = tempfile::NamedTempFile::new().unwrap();
        assert!(scratch.path().starts_with(expected));
    }

    #[test]
    #[serial(tmpdir)]
    fn unresolved_mount_point_is_refused() {
        let before = std::env::var_os(TMPDIR_VAR);
        let cfg = Config::default();
        assert!(matches!(confine_tmpdir(&cfg), Err(SandboxError::Unresolved)));
        assert_eq!(std::env::var_os(TMPDIR_VAR), before);
    }
}
