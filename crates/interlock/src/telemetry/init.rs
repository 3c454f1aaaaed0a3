//! Tracing subscriber setup and the log sink switch.

use anyhow::{Context, Result};
use tracing::{error, info, warn, Dispatch};
use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::Registry, reload, EnvFilter, Layer,
};

use super::sink::{Destination, LogChannel, LogSinkError, SinkKind};

type FormatLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Owns the [`LogChannel`] and the output format that goes with each sink.
pub struct LogSwitch {
    channel: LogChannel,
    format: reload::Handle<FormatLayer, Registry>,
    debug: bool,
}

impl LogSwitch {
    /// The channel every log line goes through.
    pub fn channel(&self) -> &LogChannel {
        &self.channel
    }

    /// Move log output to `dest`, recording the switch on both sides.
    ///
    /// On failure the console remains active and receives the error.
    ///
    /// # Errors
    ///
    /// Returns [`LogSinkError`] if `dest` cannot be opened.
    pub fn switch(&self, dest: Destination) -> Result<(), LogSinkError> {
        info!("switching to {dest}");
        let result = self.channel.switch(&dest);
        self.reformat(self.channel.kind());
        match &result {
            Ok(()) => info!("log output switched to {dest}"),
            Err(e) => error!("{e}; logging continues on console"),
        }
        result
    }

    fn reformat(&self, kind: SinkKind) {
        if let Err(e) = self
            .format
            .reload(format_layer(&self.channel, kind, self.debug))
        {
            warn!(error = %e, "could not reload log format");
        }
    }
}

/// Line format for each sink. Syslog stamps its own time.
fn format_layer(channel: &LogChannel, kind: SinkKind, debug: bool) -> FormatLayer {
    let base = fmt::layer()
        .with_writer(channel.clone())
        .with_ansi(false)
        .with_target(false);
    match kind {
        SinkKind::Console if debug => base.with_file(true).with_line_number(true).boxed(),
        SinkKind::Console | SinkKind::File => base.boxed(),
        SinkKind::Syslog => base.without_time().boxed(),
    }
}

/// Build a dispatcher writing through `channel`, plus its [`LogSwitch`].
///
/// `RUST_LOG` overrides the default level (`debug` in debug mode, `info`
/// otherwise).
pub fn build(channel: LogChannel, debug: bool) -> (Dispatch, LogSwitch) {
    let level = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    build_with_filter(channel, debug, env_filter)
}

/// [`build`] with an explicit filter instead of `RUST_LOG`.
pub fn build_with_filter(
    channel: LogChannel,
    debug: bool,
    env_filter: EnvFilter,
) -> (Dispatch, LogSwitch) {
    let (format, handle) = reload::Layer::new(format_layer(&channel, channel.kind(), debug));
    let subscriber = Registry::default().with(format).with(env_filter);

    let switch = LogSwitch {
        channel,
        format: handle,
        debug,
    };
    (Dispatch::new(subscriber), switch)
}

/// Install the global subscriber, starting on `channel`'s console.
///
/// # Errors
///
/// Returns an error if a global subscriber has already been set.
pub fn init_logging(channel: LogChannel, debug: bool) -> Result<LogSwitch> {
    let (dispatch, switch) = build(channel, debug);
    tracing::dispatcher::set_global_default(dispatch)
        .context("failed to initialise tracing subscriber")?;
    Ok(switch)
}
