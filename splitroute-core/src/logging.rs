use std::fs::OpenOptions;

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

pub type FileFmtLayer =
    fmt::Layer<tracing_subscriber::Registry, fmt::format::DefaultFields, fmt::format::Format, BoxMakeWriter>;

pub type LogReloadHandle = reload::Handle<FileFmtLayer, tracing_subscriber::Registry>;

const DEFAULT_LOG_FILTER: &str = "info";
const VERBOSE_LOG_FILTER: &str = "debug";
const ENV_VAR_LOG_FILE: &str = "SPLITROUTE_LOG_FILE";

#[cfg(target_os = "macos")]
const DEFAULT_LOG_FILE: &str = "/Library/Logs/SplitRoute/splitrouted.log";
#[cfg(not(target_os = "macos"))]
const DEFAULT_LOG_FILE: &str = "/var/log/splitrouted.log";

pub fn make_file_fmt_layer(log_path: &str) -> FileFmtLayer {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .unwrap_or_else(|e| panic!("failed to open log file {log_path}: {e}"));

    fmt::layer().with_writer(BoxMakeWriter::new(file)).with_ansi(false)
}

pub fn log_path() -> String {
    std::env::var(ENV_VAR_LOG_FILE).unwrap_or_else(|_| DEFAULT_LOG_FILE.to_string())
}

/// Initializes the global subscriber: a reloadable file layer plus, unless
/// `silent`, a stdout layer. `verbose` raises the default filter to `debug`.
///
/// Returns a handle that can swap the file layer's underlying writer (used
/// on `SIGHUP` to pick up external log rotation) and the resolved log path.
pub fn init(silent: bool, verbose: bool) -> (LogReloadHandle, String) {
    let log_path = log_path();
    let default_filter = if verbose { VERBOSE_LOG_FILTER } else { DEFAULT_LOG_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (reload_layer, reload_handle): (
        reload::Layer<FileFmtLayer, tracing_subscriber::Registry>,
        LogReloadHandle,
    ) = reload::Layer::new(make_file_fmt_layer(&log_path));

    let registry = tracing_subscriber::registry().with(reload_layer).with(filter);

    if silent {
        registry.init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stdout)).init();
    }

    (reload_handle, log_path)
}

/// Reopens the configured log file and swaps it into the reload layer.
/// Used by the `SIGHUP` handler so external logrotate-style tools can
/// rename the old file out from under the daemon.
pub fn reload(handle: &LogReloadHandle, log_path: &str) -> Result<(), reload::Error> {
    handle.reload(make_file_fmt_layer(log_path))
}
