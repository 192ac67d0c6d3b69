//! Logging setup.
//!
//! Two layers share one filter: timestamped console output on stderr and an
//! append-only copy in the persistent log file. Without permission to open
//! the log file (not root) only the console layer is installed.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Default filter: `info`, or `debug` with `--debug`. `RUST_LOG` wins.
fn env_filter(debug: bool) -> EnvFilter {
    let default = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Install the global subscriber. Returns false when the log file could
/// not be opened.
pub fn init_logging(log_file: &Path, debug: bool) -> bool {
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(env_filter(debug));

    let opened = log_file
        .parent()
        .map(std::fs::create_dir_all)
        .transpose()
        .and_then(|_| OpenOptions::new().create(true).append(true).open(log_file));

    let (file_layer, file_error) = match opened {
        Ok(file) => {
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(env_filter(debug));
            (Some(layer), None)
        }
        Err(e) => (None, Some(e)),
    };

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();

    match file_error {
        Some(e) => {
            tracing::warn!("Cannot open log file {}: {}; logging to console only", log_file.display(), e);
            false
        }
        None => true,
    }
}
