//! Ordered startup sequence.
//!
//! Each stage runs only after the previous one succeeded:
//!
//! 1. Configuration: defaults, file overlay, command line flags.
//! 2. Mount point resolution.
//! 3. `TMPDIR` confinement to the mount point.
//! 4. Cipher validation and configuration summary.
//! 5. Log sink switch (syslog or encrypted file, console in debug mode).
//! 6. Handler registration.
//! 7. TLS configuration, bind, serve.
//!
//! The privilege check precedes all of this in `main`. Everything up to and
//! including TLS configuration runs on the main thread before the async
//! runtime exists; only [`Prepared::serve`] runs on it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use tracing::{debug, info, Level};

use crate::ciphers::{BuiltinCiphers, CipherRegistry};
use crate::config::{Config, LogTarget};
use crate::error::InterlockError;
use crate::sandbox::{self, SandboxError};
use crate::server::launcher::Launcher;
use crate::server::router::register_handlers;
use crate::server::state::AppState;
use crate::telemetry::{Destination, LogSwitch};

pub const TEST_MODE_WARNING: &str =
    "*** WARNING *** authentication disabled (test mode switch enabled)";

/// Startup options taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub config_path: Option<PathBuf>,
    pub debug: bool,
    pub test_mode: bool,
    pub bind_address: Option<SocketAddr>,
}

/// Everything needed to start serving.
pub struct Prepared {
    pub config: Arc<Config>,
    pub router: Router,
    pub launcher: Launcher,
}

impl Prepared {
    /// Bind and serve until the listener fails.
    ///
    /// # Errors
    ///
    /// Returns the bind error, or the accept-loop error that terminated
    /// serving.
    pub async fn serve(self) -> Result<(), InterlockError> {
        let Prepared {
            config,
            router,
            mut launcher,
        } = self;
        launcher.bind().await?;
        info!(
            mutual_tls = launcher.mutual_tls(),
            test_mode = config.test_mode,
            "serving"
        );
        let result = launcher.serve(router).await;
        debug!(state = ?launcher.state(), "listener stopped");
        Ok(result?)
    }
}

/// Enter the executable's directory and run [`prepare`] with the built-in
/// cipher registry.
///
/// # Errors
///
/// Returns the first stage failure; see [`InterlockError::stage`].
pub fn start(opts: &Options, log: &LogSwitch) -> Result<Prepared, InterlockError> {
    enter_executable_dir()?;
    prepare(opts, log, &BuiltinCiphers)
}

/// Relative paths in the configuration resolve against the binary's directory.
fn enter_executable_dir() -> Result<(), InterlockError> {
    let exe = std::env::current_exe().map_err(InterlockError::WorkDir)?;
    if let Some(dir) = exe.parent() {
        std::env::set_current_dir(dir).map_err(InterlockError::WorkDir)?;
    }
    Ok(())
}

/// Run every stage up to, but not including, binding the listener.
///
/// # Errors
///
/// Returns the first stage failure. Log sink failures are not fatal: the
/// console takes over and startup continues.
pub fn prepare(
    opts: &Options,
    log: &LogSwitch,
    registry: &dyn CipherRegistry,
) -> Result<Prepared, InterlockError> {
    if opts.test_mode {
        log.channel().announce(Level::WARN, TEST_MODE_WARNING);
    }
    info!("starting INTERLOCK {}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::default();
    if let Some(path) = &opts.config_path {
        config.set(path)?;
        info!("configuration file {} successfully parsed", path.display());
    }
    config.apply_cli(opts.debug, opts.test_mode, opts.bind_address);

    config.set_mount_point()?;
    sandbox::confine_tmpdir(&config)?;

    config.enable_ciphers(registry)?;
    config.print();

    if config.debug {
        info!("debug mode enabled");
    } else {
        let dest = match config.log_target {
            LogTarget::Syslog => Destination::Syslog,
            LogTarget::File => {
                Destination::File(config.log_file_path().ok_or(SandboxError::Unresolved)?)
            }
        };
        // A failed switch leaves the console active and is already recorded there.
        let _ = log.switch(dest);
    }

    if config.test_mode {
        log.channel().announce(Level::WARN, TEST_MODE_WARNING);
    }

    let config = Arc::new(config);
    info!("starting server on {}", config.bind_address);

    let state = AppState::new(Arc::clone(&config), log.channel().clone());
    let router = register_handlers(&config.static_path, state)?;

    let mut launcher = Launcher::new(config.bind_address);
    launcher.configure(&config)?;

    Ok(Prepared {
        config,
        router,
        launcher,
    })
}
