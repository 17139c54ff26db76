use std::path::PathBuf;

use thiserror::Error;
use zaas_core::manager::ConfigError;

/// Every fatal condition of a bootstrap run.
///
/// Components return these; only the CLI driver turns one into a process exit.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("this tool must be run as root")]
    PrivilegeRequired,

    #[error("identity file {path} is corrupt: {reason}")]
    CorruptIdentity { path: PathBuf, reason: String },

    #[error("config file {path} is invalid: {source}")]
    InvalidConfig {
        path: PathBuf,
        #[source]
        source: ConfigError,
    },

    #[error("config file {path} could not be loaded after it was saved")]
    ConfigNotPersisted { path: PathBuf },

    #[error("no controlling terminal available at {path}: {source}")]
    TerminalUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration provided: {0}")]
    InvalidPairingInput(#[source] ConfigError),

    #[error("SSO provider returned HTTP {status}: {body}")]
    SsoProvider { status: u16, body: String },

    #[error("SSO provider response did not contain a client secret")]
    MissingSecret,

    #[error("fleet manager registration failed with HTTP {status}: {detail}")]
    ManagerRegistration { status: u16, detail: String },

    #[error("instance has no client secret yet; run the full bootstrap first")]
    NotRegistered,

    #[error("failed to contact {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("interrupted by operator")]
    InterruptedByOperator,
}

impl BootstrapError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit code for this error. Operator interrupts get their own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InterruptedByOperator => 130,
            _ => 1,
        }
    }
}
