//! Shared helpers for unit tests.

use std::ffi::OsString;
use std::path::PathBuf;

use crate::sandbox::TMPDIR_VAR;

/// Restores `TMPDIR` to its captured value on drop.
pub struct TmpdirGuard(Option<OsString>);

impl TmpdirGuard {
    pub fn capture() -> Self {
        Self(std::env::var_os(TMPDIR_VAR))
    }
}

impl Drop for TmpdirGuard {
    fn drop(&mut self) {
        match self.0.take() {
            Some(v) => std::env::set_var(TMPDIR_VAR, v),
            None => std::env::remove_var(TMPDIR_VAR),
        }
    }
}

/// A directory that outlives the test.
///
/// Used as mount point by tests that rebind `TMPDIR`: tests running in
/// parallel may create their scratch files inside it while it is active.
pub fn persistent_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("interlock-test-{name}"));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Path of a PEM fixture under `testdata/`.
pub fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("testdata")
        .join(name)
}

/// In-memory console for capturing log output.
#[derive(Clone, Default)]
pub struct SharedBuf(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl std::io::Write for SharedBuf {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
