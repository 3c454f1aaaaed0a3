//! [`LogChannel`]: the single, switchable destination of all log output.
//!
//! Three sinks exist: the console (always available), the local syslog
//! daemon and an append-only file inside the encrypted mount point. At most
//! one of syslog or file is open at any instant; when neither is, output goes
//! to the console.
//!
//! Every formatted event is buffered by a [`ChannelWriter`] and written under
//! a mutex when the writer is dropped, so lines from concurrent connections
//! never interleave.

use std::fmt;
use std::fs::{File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use syslog::{Facility, Formatter3164, Logger, LoggerBackend};
use thiserror::Error;
use tracing::Level;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::{FormatTime, SystemTime};
use tracing_subscriber::fmt::MakeWriter;

/// Process name reported to syslog.
pub const SYSLOG_IDENT: &str = "interlock";

/// Permission bits of the log file: owner read/write only.
pub const LOG_FILE_MODE: u32 = 0o600;

/// Failure to open a log sink.
#[derive(Debug, Error)]
pub enum LogSinkError {
    #[error("could not connect to syslog: {0}")]
    Syslog(String),

    #[error("could not switch to log file {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Which sink currently receives output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Console,
    Syslog,
    File,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Console => "console",
            SinkKind::Syslog => "syslog",
            SinkKind::File => "file",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested sink for [`LogChannel::switch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Console,
    Syslog,
    File(PathBuf),
}

impl Destination {
    pub fn kind(&self) -> SinkKind {
        match self {
            Destination::Console => SinkKind::Console,
            Destination::Syslog => SinkKind::Syslog,
            Destination::File(_) => SinkKind::File,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::File(path) => write!(f, "log file {}", path.display()),
            other => f.write_str(other.kind().as_str()),
        }
    }
}

/// An open, non-console sink.
enum SinkHandle {
    Syslog(Logger<LoggerBackend, Formatter3164>),
    File { file: File, path: PathBuf },
}

impl SinkHandle {
    fn kind(&self) -> SinkKind {
        match self {
            SinkHandle::Syslog(_) => SinkKind::Syslog,
            SinkHandle::File { .. } => SinkKind::File,
        }
    }

    fn write_record(&mut self, record: &[u8]) -> io::Result<()> {
        match self {
            SinkHandle::File { file, .. } => file.write_all(record),
            SinkHandle::Syslog(logger) => {
                let text = String::from_utf8_lossy(record);
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    send_syslog(logger, line)
                        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
                }
                Ok(())
            }
        }
    }
}

/// Map the level prefix written by the formatter onto a syslog severity.
fn send_syslog(
    logger: &mut Logger<LoggerBackend, Formatter3164>,
    line: &str,
) -> Result<(), syslog::Error> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("ERROR") {
        logger.err(line)
    } else if trimmed.starts_with("WARN") {
        logger.warning(line)
    } else if trimmed.starts_with("DEBUG") || trimmed.starts_with("TRACE") {
        logger.debug(line)
    } else {
        logger.info(line)
    }
}

struct ChannelState {
    console: Box<dyn Write + Send>,
    handle: Option<SinkHandle>,
}

impl ChannelState {
    fn emit(&mut self, record: &[u8]) {
        if let Some(handle) = self.handle.as_mut() {
            match handle.write_record(record) {
                Ok(()) => return,
                Err(e) => {
                    let _ = writeln!(self.console, "log sink {} write failed: {e}", handle.kind());
                }
            }
        }
        let _ = self.console.write_all(record);
        let _ = self.console.flush();
    }
}

/// Cloneable handle to the active log sink.
#[derive(Clone)]
pub struct LogChannel {
    inner: Arc<Mutex<ChannelState>>,
}

impl fmt::Debug for LogChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogChannel")
            .field("kind", &self.kind())
            .field("file", &self.file_path())
            .finish()
    }
}

impl LogChannel {
    /// Channel writing to standard output.
    pub fn console() -> Self {
        Self::with_console(io::stdout())
    }

    /// Channel whose console sink is `console`.
    pub fn with_console(console: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChannelState {
                console: Box::new(console),
                handle: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        // A panic while holding the lock leaves the state consistent.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The sink currently receiving output.
    pub fn kind(&self) -> SinkKind {
        self.lock()
            .handle
            .as_ref()
            .map_or(SinkKind::Console, SinkHandle::kind)
    }

    /// Path of the open log file, if the file sink is active.
    pub fn file_path(&self) -> Option<PathBuf> {
        match self.lock().handle.as_ref() {
            Some(SinkHandle::File { path, .. }) => Some(path.clone()),
            _ => None,
        }
    }

    /// Move output to `dest`.
    ///
    /// The currently open syslog or file handle is closed first, leaving the
    /// console in charge. If `dest` cannot be opened the console stays
    /// active, so output is never lost.
    ///
    /// # Errors
    ///
    /// Returns [`LogSinkError`] if `dest` cannot be opened.
    pub fn switch(&self, dest: &Destination) -> Result<(), LogSinkError> {
        let mut state = self.lock();
        state.handle = None;

        let handle = match dest {
            Destination::Console => return Ok(()),
            Destination::Syslog => SinkHandle::Syslog(open_syslog()?),
            Destination::File(path) => SinkHandle::File {
                file: open_log_file(path)?,
                path: path.clone(),
            },
        };
        state.handle = Some(handle);
        Ok(())
    }

    fn emit(&self, record: &[u8]) {
        if !record.is_empty() {
            self.lock().emit(record);
        }
    }

    /// Write `message` to the active sink, bypassing level filters.
    ///
    /// For lines that must reach the operator whatever `RUST_LOG` says: the
    /// test mode warning and the final fatal diagnostic.
    pub fn announce(&self, level: Level, message: &str) {
        let mut state = self.lock();
        let mut line = String::new();
        // Syslog stamps its own time.
        if !matches!(state.handle, Some(SinkHandle::Syslog(_)))
            && SystemTime.format_time(&mut Writer::new(&mut line)).is_ok()
        {
            line.push(' ');
        }
        line.push_str(&format!("{:>5} {message}\n", level.as_str()));
        state.emit(line.as_bytes());
    }
}

fn open_syslog() -> Result<Logger<LoggerBackend, Formatter3164>, LogSinkError> {
    let formatter = Formatter3164 {
        facility: Facility::LOG_USER,
        process: SYSLOG_IDENT.into(),
        ..Default::default()
    };
    syslog::unix(formatter).map_err(|e| LogSinkError::Syslog(e.to_string()))
}

/// Open `path` for appending, creating it owner read/write only.
///
/// Permissions of a pre-existing file are tightened as well.
fn open_log_file(path: &Path) -> Result<File, LogSinkError> {
    let file_err = |source| LogSinkError::File {
        path: path.to_path_buf(),
        source,
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(LOG_FILE_MODE)
        .open(path)
        .map_err(file_err)?;
    file.set_permissions(Permissions::from_mode(LOG_FILE_MODE))
        .map_err(file_err)?;
    Ok(file)
}

/// Buffers one formatted event; writes it to the channel on drop.
pub struct ChannelWriter {
    channel: LogChannel,
    buf: Vec<u8>,
}

impl Write for ChannelWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ChannelWriter {
    fn drop(&mut self) {
        self.channel.emit(&self.buf);
    }
}

impl<'a> MakeWriter<'a> for LogChannel {
    type Writer = ChannelWriter;

    fn make_writer(&'a self) -> Self::Writer {
        ChannelWriter {
            channel: self.clone(),
            buf: Vec::with_capacity(256),
        }
    }
}
