use std::fs::{self, File, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::Path;
use std::sync::Mutex;

use tracing::warn;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

/// Initialize the global tracing subscriber.
///
/// Call once at program startup. Respects `RUST_LOG` env var for filtering.
/// Default filter: `zaas=info,warn`. Human-readable records go to stderr and,
/// when `log_file` is given, JSON records are appended to it. A log file that
/// cannot be opened degrades to console output only.
pub fn init(log_file: Option<&Path>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("zaas=info,warn"));

    let console = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(io::stderr)
        .compact();

    let (file, open_error) = match log_file.map(open_log_file).transpose() {
        Ok(file) => (file, None),
        Err(e) => (None, Some(e)),
    };
    let file_layer = file.map(|file| {
        fmt::layer()
            .json()
            .with_target(true)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console)
        .with(file_layer)
        .init();

    if let (Some(path), Some(e)) = (log_file, open_error) {
        warn!(path = %path.display(), error = %e, "cannot open log file, logging to console only");
    }
}

/// Open `path` for appending, owner-only.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(0o600)
        .open(path)?;
    // mode() only applies on creation
    file.set_permissions(Permissions::from_mode(0o600))?;
    Ok(file)
}
