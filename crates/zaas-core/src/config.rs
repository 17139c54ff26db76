use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_DIR: &str = "/etc/zaas";
pub const CONFIG_FILE: &str = "zaas.json";
pub const IDENTITY_FILE: &str = "uuid";
pub const DEFAULT_LOG_FILE: &str = "/var/log/zaas-bootstrap.log";
pub const DEFAULT_TTY: &str = "/dev/tty";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Runtime settings, resolved once at startup and passed by reference.
///
/// Priority: explicit override (CLI flag) > environment variable > compiled default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub config_dir: PathBuf,
    pub log_file: PathBuf,
    /// Terminal device the pairing document is read from.
    pub tty_path: PathBuf,
    pub http_timeout: Duration,
}

/// Values supplied on the command line. `None` falls through to env/defaults.
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub config_dir: Option<PathBuf>,
    pub log_file: Option<PathBuf>,
    pub http_timeout_secs: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_dir: PathBuf::from(DEFAULT_CONFIG_DIR),
            log_file: PathBuf::from(DEFAULT_LOG_FILE),
            tty_path: PathBuf::from(DEFAULT_TTY),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
        }
    }
}

impl Settings {
    /// Resolve settings from overrides and the process environment.
    pub fn resolve(overrides: &SettingsOverrides) -> Self {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve settings with an injectable environment lookup.
    pub fn resolve_with<F>(overrides: &SettingsOverrides, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env_path = |key: &str| env(key).filter(|v| !v.is_empty()).map(PathBuf::from);

        let timeout_secs = overrides
            .http_timeout_secs
            .or_else(|| env("ZAAS_HTTP_TIMEOUT_SECS").and_then(|v| v.trim().parse().ok()))
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);

        Self {
            config_dir: overrides
                .config_dir
                .clone()
                .or_else(|| env_path("ZAAS_CONFIG_DIR"))
                .unwrap_or(defaults.config_dir),
            log_file: overrides
                .log_file
                .clone()
                .or_else(|| env_path("ZAAS_LOG_FILE"))
                .unwrap_or(defaults.log_file),
            tty_path: env_path("ZAAS_TTY").unwrap_or(defaults.tty_path),
            http_timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    pub fn identity_path(&self) -> PathBuf {
        self.config_dir.join(IDENTITY_FILE)
    }

    /// Settings rooted at `dir`, everything else default. Handy for tests and tooling.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            config_dir: dir.to_path_buf(),
            ..Self::default()
        }
    }
}
