//! Tracing setup for the CLI.
//!
//! Diagnostics go to stderr (quiet unless `-v` or `FLEETQ_LOG` asks for more)
//! and, when a data directory exists, to a daily log file next to the cache.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Directive used when `FLEETQ_LOG` is unset.
pub fn default_directive(verbosity: u8) -> &'static str {
  match verbosity {
    0 => "warn",
    1 => "fleetq=info",
    2 => "fleetq=debug",
    _ => "fleetq=trace",
  }
}

/// `$XDG_DATA_HOME/fleetq/logs`
pub fn log_dir() -> Option<PathBuf> {
  dirs::data_dir().map(|dir| dir.join("fleetq").join("logs"))
}

/// Install the global subscriber. Keep the returned guard alive until exit so
/// buffered file output is flushed.
pub fn init(verbosity: u8) -> Option<WorkerGuard> {
  let stderr_filter = EnvFilter::try_from_env("FLEETQ_LOG")
    .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
  let stderr_layer = fmt::layer()
    .with_writer(std::io::stderr)
    .with_target(false)
    .with_filter(stderr_filter);

  let (file_layer, guard) = match log_dir().filter(|dir| std::fs::create_dir_all(dir).is_ok()) {
    Some(dir) => {
      let appender = tracing_appender::rolling::daily(dir, "fleetq.log");
      let (writer, guard) = tracing_appender::non_blocking(appender);
      let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_filter(EnvFilter::new("fleetq=debug"));
      (Some(layer), Some(guard))
    }
    None => (None, None),
  };

  // Already initialised (e.g. in tests) is fine
  let _ = tracing_subscriber::registry()
    .with(stderr_layer)
    .with(file_layer)
    .try_init();

  guard
}
