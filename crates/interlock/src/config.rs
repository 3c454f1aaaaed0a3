//! Configuration defaults, file overlay and validation.
//!
//! The configuration is assembled in a fixed order at startup:
//!
//! 1. [`Config::default`] establishes a safe baseline.
//! 2. [`Config::set`] overlays a JSON configuration file, all or nothing.
//! 3. [`Config::apply_cli`] applies explicit command line flags.
//! 4. [`Config::set_mount_point`] resolves the encrypted mount point.
//! 5. [`Config::enable_ciphers`] validates the requested cipher set.
//!
//! Once the server starts, the value is frozen behind an `Arc` and never
//! mutated again.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use nix::unistd::{access, geteuid, AccessFlags, User};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::ciphers::CipherRegistry;

/// Directory under which per-user encrypted volumes are mounted.
pub const DEFAULT_MOUNT_ROOT: &str = "/run/media";

/// Name of the log file created inside the mount point.
pub const LOG_FILE_NAME: &str = ".interlock.log";

/// Non-debug log destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTarget {
    /// Local system logger.
    Syslog,
    /// `.interlock.log` inside the encrypted mount point.
    File,
}

/// Errors raised while reading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Syntax error, unknown key, wrong type, or unreadable file.
    #[error("could not parse configuration file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: config::ConfigError,
    },

    /// A key parsed but its value is unusable.
    #[error("invalid value for `{key}` in configuration file: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

/// Errors raised while resolving the encrypted mount point.
#[derive(Debug, Error)]
pub enum MountResolutionError {
    /// No mount point was configured and the current user has no passwd entry.
    #[error("cannot determine default mount point: {0}")]
    UnknownUser(String),

    #[error("mount point {} does not exist", .0.display())]
    Missing(PathBuf),

    #[error("mount point {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("mount point {} is not accessible: {source}", path.display())]
    Inaccessible {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("could not inspect mount point {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A configured cipher identifier the registry does not know.
#[derive(Debug, Error)]
#[error("unsupported cipher name in configuration: {id}")]
pub struct UnsupportedCipherError {
    pub id: String,
}

/// Runtime configuration of the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Console logging with source locations; no switch to syslog or file.
    pub debug: bool,
    /// Disables authentication. Command line only.
    pub test_mode: bool,
    /// Directory of static content handed to the handler registry.
    pub static_path: PathBuf,
    /// Listener address.
    pub bind_address: SocketAddr,
    /// PEM certificate chain presented by the server.
    pub tls_cert: PathBuf,
    /// PEM private key matching [`Config::tls_cert`].
    pub tls_key: PathBuf,
    /// PEM bundle of client CAs; mutual TLS is mandatory when set.
    pub tls_client_ca: Option<PathBuf>,
    /// Key storage directory, relative to the mount point.
    pub key_path: PathBuf,
    /// Requested cipher identifiers.
    pub ciphers: Vec<String>,
    /// Explicit mount point; `/run/media/<user>` when unset.
    pub mount_point: Option<PathBuf>,
    /// Where logs go outside debug mode.
    pub log_target: LogTarget,

    resolved_mount_point: Option<PathBuf>,
    enabled_ciphers: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            test_mode: false,
            static_path: PathBuf::from("static"),
            bind_address: default_bind_address(),
            tls_cert: PathBuf::from("certs/cert.pem"),
            tls_key: PathBuf::from("certs/key.pem"),
            tls_client_ca: None,
            key_path: PathBuf::from("keys"),
            ciphers: default_ciphers(),
            mount_point: None,
            log_target: LogTarget::Syslog,
            resolved_mount_point: None,
            enabled_ciphers: Vec::new(),
        }
    }
}

fn default_bind_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 4430))
}

fn default_ciphers() -> Vec<String> {
    ["OpenPGP", "AES-256-OFB", "TOTP"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Keys accepted in the configuration file. Everything is optional; absent
/// keys leave the current value untouched.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    debug: Option<bool>,
    static_path: Option<PathBuf>,
    bind_address: Option<String>,
    tls_cert: Option<PathBuf>,
    tls_key: Option<PathBuf>,
    tls_client_ca: Option<PathBuf>,
    key_path: Option<PathBuf>,
    ciphers: Option<Vec<String>>,
    mount_point: Option<PathBuf>,
    log_target: Option<LogTarget>,
}

/// [`ConfigFile`] after value validation, ready to apply.
struct Overlay {
    file: ConfigFile,
    bind_address: Option<SocketAddr>,
}

impl ConfigFile {
    fn validate(self) -> Result<Overlay, ConfigError> {
        ensure_non_empty_path(&self.static_path, "static_path")?;
        ensure_non_empty_path(&self.tls_cert, "tls_cert")?;
        ensure_non_empty_path(&self.tls_key, "tls_key")?;
        ensure_non_empty_path(&self.key_path, "key_path")?;
        ensure_non_empty_path(&self.mount_point, "mount_point")?;

        if let Some(ciphers) = &self.ciphers {
            if ciphers.iter().any(|c| c.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    key: "ciphers",
                    reason: "cipher names must not be empty".into(),
                });
            }
        }

        let bind_address = self
            .bind_address
            .as_deref()
            .map(|addr| {
                addr.parse::<SocketAddr>()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "bind_address",
                        reason: format!("{addr:?}: {e}"),
                    })
            })
            .transpose()?;

        Ok(Overlay {
            file: self,
            bind_address,
        })
    }
}

fn ensure_non_empty_path(value: &Option<PathBuf>, key: &'static str) -> Result<(), ConfigError> {
    match value {
        Some(p) if p.as_os_str().is_empty() => Err(ConfigError::InvalidValue {
            key,
            reason: "must not be empty".into(),
        }),
        _ => Ok(()),
    }
}

impl Config {
    /// Overlay the JSON configuration file at `path`.
    ///
    /// The file is fully parsed and validated before any field is touched.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] on unreadable files, malformed JSON, unknown
    /// keys or invalid values. `self` is left unchanged in that case.
    pub fn set(&mut self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let parse_err = |source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };

        let file: ConfigFile = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(true),
            )
            .build()
            .map_err(parse_err)?
            .try_deserialize()
            .map_err(parse_err)?;

        let overlay = file.validate()?;
        self.apply(overlay);
        Ok(())
    }

    fn apply(&mut self, overlay: Overlay) {
        let Overlay { file, bind_address } = overlay;

        if let Some(v) = file.debug {
            self.debug = v;
        }
        if let Some(v) = file.static_path {
            self.static_path = v;
        }
        if let Some(v) = bind_address {
            self.bind_address = v;
        }
        if let Some(v) = file.tls_cert {
            self.tls_cert = v;
        }
        if let Some(v) = file.tls_key {
            self.tls_key = v;
        }
        if let Some(v) = file.tls_client_ca {
            // An empty string explicitly disables mutual TLS.
            self.tls_client_ca = (!v.as_os_str().is_empty()).then_some(v);
        }
        if let Some(v) = file.key_path {
            self.key_path = v;
        }
        if let Some(v) = file.ciphers {
            self.ciphers = v;
        }
        if let Some(v) = file.mount_point {
            self.mount_point = Some(v);
        }
        if let Some(v) = file.log_target {
            self.log_target = v;
        }
    }

    /// Apply explicit command line flags on top of the file values.
    pub fn apply_cli(&mut self, debug: bool, test_mode: bool, bind_address: Option<SocketAddr>) {
        self.debug |= debug;
        self.test_mode = test_mode;
        if let Some(addr) = bind_address {
            self.bind_address = addr;
        }
    }

    /// Resolve and validate the encrypted mount point.
    ///
    /// # Errors
    ///
    /// Returns [`MountResolutionError`] if the directory is missing, is not a
    /// directory, or is not readable, writable and searchable.
    pub fn set_mount_point(&mut self) -> Result<(), MountResolutionError> {
        let candidate = match &self.mount_point {
            Some(p) => p.clone(),
            None => default_mount_point()?,
        };

        let meta = std::fs::metadata(&candidate).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MountResolutionError::Missing(candidate.clone()),
            _ => MountResolutionError::Io {
                path: candidate.clone(),
                source: e,
            },
        })?;
        if !meta.is_dir() {
            return Err(MountResolutionError::NotADirectory(candidate));
        }

        access(
            &candidate,
            AccessFlags::R_OK | AccessFlags::W_OK | AccessFlags::X_OK,
        )
        .map_err(|source| MountResolutionError::Inaccessible {
            path: candidate.clone(),
            source,
        })?;

        let resolved = candidate
            .canonicalize()
            .map_err(|source| MountResolutionError::Io {
                path: candidate.clone(),
                source,
            })?;

        self.resolved_mount_point = Some(resolved);
        Ok(())
    }

    /// The mount point, once [`Config::set_mount_point`] succeeded.
    pub fn resolved_mount_point(&self) -> Option<&Path> {
        self.resolved_mount_point.as_deref()
    }

    /// Path of the encrypted log file, once the mount point is resolved.
    pub fn log_file_path(&self) -> Option<PathBuf> {
        self.resolved_mount_point().map(|m| m.join(LOG_FILE_NAME))
    }

    /// Validate [`Config::ciphers`] against `registry`.
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedCipherError`] naming the first unknown identifier;
    /// no cipher is enabled in that case.
    pub fn enable_ciphers(
        &mut self,
        registry: &dyn CipherRegistry,
    ) -> Result<(), UnsupportedCipherError> {
        let mut enabled: Vec<String> = Vec::with_capacity(self.ciphers.len());
        for id in &self.ciphers {
            if !registry.is_supported(id) {
                return Err(UnsupportedCipherError { id: id.clone() });
            }
            if !enabled.contains(id) {
                enabled.push(id.clone());
            }
        }
        if enabled.is_empty() {
            warn!("no ciphers enabled");
        }
        self.enabled_ciphers = enabled;
        Ok(())
    }

    /// Cipher identifiers accepted by [`Config::enable_ciphers`].
    pub fn enabled_ciphers(&self) -> &[String] {
        &self.enabled_ciphers
    }

    /// Redacted `(key, value)` view of the configuration.
    ///
    /// Only paths, flags and identifiers; file contents are never read here.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        let mount = self
            .resolved_mount_point()
            .or(self.mount_point.as_deref())
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<unresolved>".into());
        let ciphers = if self.enabled_ciphers.is_empty() {
            &self.ciphers
        } else {
            &self.enabled_ciphers
        };

        vec![
            ("debug", self.debug.to_string()),
            ("test_mode", self.test_mode.to_string()),
            ("static_path", self.static_path.display().to_string()),
            ("bind_address", self.bind_address.to_string()),
            ("tls_cert", self.tls_cert.display().to_string()),
            ("tls_key", self.tls_key.display().to_string()),
            (
                "tls_client_ca",
                self.tls_client_ca
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "none".into()),
            ),
            ("key_path", self.key_path.display().to_string()),
            ("mount_point", mount),
            (
                "log_target",
                match self.log_target {
                    LogTarget::Syslog => "syslog".into(),
                    LogTarget::File => "file".into(),
                },
            ),
            ("ciphers", ciphers.join(", ")),
        ]
    }

    /// Log the redacted configuration summary to the active sink.
    pub fn print(&self) {
        for (key, value) in self.summary() {
            info!("{key:<14} = {value}");
        }
    }
}

fn default_mount_point() -> Result<PathBuf, MountResolutionError> {
    let uid = geteuid();
    let user = User::from_uid(uid)
        .map_err(|e| MountResolutionError::UnknownUser(e.to_string()))?
        .ok_or_else(|| MountResolutionError::UnknownUser(format!("no passwd entry for uid {uid}")))?;
    Ok(Path::new(DEFAULT_MOUNT_ROOT).join(user.name))
}
