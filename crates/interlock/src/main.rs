//! `interlock` — file encryption front-end, service entry point.
//!
//! Startup sequence:
//! 1. Refuse to run with administrative privileges.
//! 2. Parse command line flags.
//! 3. Initialise console logging.
//! 4. Run the bootstrap sequence (see [`bootstrap`]) on the main thread.
//! 5. Start the async runtime and serve until the listener fails.

mod bootstrap;
mod ciphers;
mod config;
mod error;
mod privilege;
mod sandbox;
mod server;
mod telemetry;

#[cfg(test)]
mod test_support;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::Level;

use bootstrap::Options;
use error::InterlockError;
use telemetry::{LogChannel, LogSwitch};

/// HTTPS front-end for encrypted file storage.
#[derive(Debug, Parser)]
#[command(name = "interlock", version, about)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Keep logging on the console, with source locations
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Disable authentication. Never use in production.
    #[arg(short = 't', long = "test")]
    test_mode: bool,

    /// Listener address, overrides the configuration file
    #[arg(short = 'b', long = "bind", value_name = "ADDR")]
    bind_address: Option<SocketAddr>,
}

impl From<Cli> for Options {
    fn from(cli: Cli) -> Self {
        Options {
            config_path: cli.config,
            debug: cli.debug,
            test_mode: cli.test_mode,
            bind_address: cli.bind_address,
        }
    }
}

fn main() -> ExitCode {
    // -----------------------------------------------------------------------
    // 1. Privilege check
    // -----------------------------------------------------------------------
    // Runs before anything else touches the filesystem or the network.
    if let Err(e) = privilege::ensure_unprivileged().map_err(InterlockError::from) {
        // No subscriber yet; write to stderr directly.
        eprintln!("ERROR: {}", e.diagnostic());
        return ExitCode::FAILURE;
    }

    // -----------------------------------------------------------------------
    // 2. Command line
    // -----------------------------------------------------------------------
    let opts = Options::from(Cli::parse());

    // -----------------------------------------------------------------------
    // 3. Console logging
    // -----------------------------------------------------------------------
    let log = match telemetry::init_logging(LogChannel::console(), opts.debug) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("ERROR: logging setup failed: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    // -----------------------------------------------------------------------
    // 4. Bootstrap, single-threaded
    // -----------------------------------------------------------------------
    let prepared = match bootstrap::start(&opts, &log) {
        Ok(prepared) => prepared,
        Err(e) => return fatal(&log, &e),
    };

    // -----------------------------------------------------------------------
    // 5. Serve
    // -----------------------------------------------------------------------
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => return fatal(&log, &InterlockError::Runtime(e)),
    };

    match runtime.block_on(prepared.serve()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => fatal(&log, &e),
    }
}

/// Report `e` on the active sink, whatever the log filter, and fail.
fn fatal(log: &LogSwitch, e: &InterlockError) -> ExitCode {
    log.channel().announce(Level::ERROR, &e.diagnostic());
    ExitCode::FAILURE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flags_map_to_options() {
        let cli = Cli::try_parse_from([
            "interlock", "-c", "/etc/interlock.conf", "-d", "-t", "-b", "127.0.0.1:8443",
        ])
        .unwrap();
        let opts = Options::from(cli);
        assert_eq!(opts.config_path, Some(PathBuf::from("/etc/interlock.conf")));
        assert!(opts.debug);
        assert!(opts.test_mode);
        assert_eq!(opts.bind_address, Some("127.0.0.1:8443".parse().unwrap()));
    }

    #[test]
    fn cli_defaults_leave_file_values_alone() {
        let opts = Options::from(Cli::try_parse_from(["interlock"]).unwrap());
        assert!(opts.config_path.is_none());
        assert!(!opts.debug);
        assert!(!opts.test_mode);
        assert!(opts.bind_address.is_none());
    }

    #[test]
    fn invalid_bind_address_is_rejected() {
        assert!(Cli::try_parse_from(["interlock", "-b", "not-an-address"]).is_err());
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
