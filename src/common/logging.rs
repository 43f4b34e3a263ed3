//! Logging and tracing configuration
//!
//! The adapter speaks the protocol over stdout, so human-readable logs go to
//! stderr. A session may additionally raise or lower the log level and turn
//! on a file sink at launch/attach time; both are applied through the
//! [`LoggingHandle`] returned by [`init`].

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    fmt::{self, format, FmtContext, FormatEvent, FormatFields, MakeWriter},
    layer::SubscriberExt,
    registry::LookupSpan,
    reload,
    util::SubscriberInitExt,
    EnvFilter, Registry,
};

use super::{Error, Result};

const DEFAULT_DIRECTIVES: &str = "debug_adapter=info,warn";

/// Runtime controls for the installed subscriber
#[derive(Clone)]
pub struct LoggingHandle {
    filter: reload::Handle<EnvFilter, Registry>,
    sink: LogFileSink,
}

/// Initialize tracing for the adapter (stderr plus the optional file sink)
///
/// Logs are controlled by the `RUST_LOG` environment variable until a session
/// requests a level. Returns `None` if a global subscriber is already set.
pub fn init() -> Option<LoggingHandle> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));
    let (filter, filter_handle) = reload::Layer::new(filter);
    let sink = LogFileSink::default();

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .compact();

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(sink_layer(sink.clone()))
        .try_init()
        .ok()?;

    Some(LoggingHandle {
        filter: filter_handle,
        sink,
    })
}

impl LoggingHandle {
    /// Replace the crate log level (`off`, `error`, `warn`, `info`, `debug`, `trace`)
    pub fn set_level(&self, level: &str) -> Result<()> {
        let filter = EnvFilter::try_new(level_directives(level)?)
            .map_err(|e| Error::invalid_argument("logLevel", e.to_string()))?;
        self.filter
            .reload(filter)
            .map_err(|e| Error::Internal(format!("Failed to reload log filter: {e}")))
    }

    /// Start appending every log line to `path`
    pub fn enable_file_sink(&self, path: &Path) -> Result<()> {
        self.sink.open(path)
    }

    /// Stop writing to the file sink
    pub fn disable_file_sink(&self) {
        self.sink.close();
    }
}

fn level_directives(level: &str) -> Result<String> {
    let level = match level.to_ascii_lowercase().as_str() {
        "none" | "off" => "off".to_string(),
        l @ ("error" | "warn" | "info" | "debug" | "trace") => l.to_string(),
        other => {
            return Err(Error::invalid_argument(
                "logLevel",
                format!("unknown level '{other}'"),
            ))
        }
    };
    Ok(format!("debug_adapter={level},warn"))
}

/// File sink that can be opened and closed while the subscriber is live
#[derive(Clone, Default)]
pub struct LogFileSink {
    file: Arc<Mutex<Option<File>>>,
}

impl LogFileSink {
    pub fn open(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        *self.file.lock() = Some(file);
        Ok(())
    }

    pub fn close(&self) {
        *self.file.lock() = None;
    }
}

/// Writer handed out per event; drops the bytes while the sink is closed
pub struct LogFileWriter {
    file: Arc<Mutex<Option<File>>>,
}

impl Write for LogFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self.file.lock();
        match guard.as_mut() {
            Some(file) => file.write(buf),
            None => Ok(buf.len()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self.file.lock();
        match guard.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for LogFileSink {
    type Writer = LogFileWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogFileWriter {
            file: Arc::clone(&self.file),
        }
    }
}

/// Formats each event as `[level] message`
pub struct BracketedLevel;

impl<S, N> FormatEvent<S, N> for BracketedLevel
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        write!(writer, "[{}] ", event.metadata().level())?;
        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

fn sink_layer<S>(sink: LogFileSink) -> fmt::Layer<S, format::DefaultFields, BracketedLevel, LogFileSink>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer().event_format(BracketedLevel).with_writer(sink)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_directives() {
        assert_eq!(level_directives("DEBUG").unwrap(), "debug_adapter=debug,warn");
        assert_eq!(level_directives("none").unwrap(), "debug_adapter=off,warn");
        assert!(level_directives("loud").is_err());
    }

    #[test]
    fn test_sink_writes_bracketed_lines_only_while_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("session.log");
        let sink = LogFileSink::default();
        let subscriber = tracing_subscriber::registry().with(sink_layer(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("before open");
            sink.open(&path).unwrap();
            tracing::warn!("stepping thread 3");
            sink.close();
            tracing::info!("after close");
        });

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "[WARN] stepping thread 3\n");
    }
}
