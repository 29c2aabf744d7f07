use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Severity levels understood by [`log`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Trace,
    Event,
    Warning,
    Error,
}

/// Initialise logging. In debug mode the default level is `debug` while
/// otherwise it falls back to `info`. The level can be overridden via the
/// `RUST_LOG` environment variable when debug logging is enabled.
///
/// When `log_file` is provided all output is appended to that file instead of
/// stderr.
pub fn init(debug: bool, log_file: Option<PathBuf>) {
    // When debug logging is disabled we force `info` level regardless of the
    // `RUST_LOG` environment variable.
    let level = if debug { "debug" } else { "info" };

    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_os_string())
                .unwrap_or_else(|| "slide_ink.log".into());
            let appender = tracing_appender::rolling::never(dir, file_name);
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(appender)
                .try_init();
        }
        None => {
            let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
        }
    }
}

/// Fire-and-forget logging entry point for collaborators that do not use
/// `tracing` directly.
pub fn log(message: &str, severity: Severity) {
    match severity {
        Severity::Trace => tracing::trace!(target: "slide_ink::external", "{message}"),
        Severity::Event => tracing::info!(target: "slide_ink::external", "{message}"),
        Severity::Warning => tracing::warn!(target: "slide_ink::external", "{message}"),
        Severity::Error => tracing::error!(target: "slide_ink::external", "{message}"),
    }
}
