use serde::Serialize;

use crate::manager::ManagerConfig;

/// Provisioning state derived from what is on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningState {
    /// No identity, no config.
    Unprovisioned,
    /// Identity exists; no manager config yet.
    Identified,
    /// Config paired, client secret not yet issued.
    AwaitingToken,
    /// Terminal: client secret present.
    Registered,
}

impl ProvisioningState {
    pub fn classify(has_identity: bool, config: Option<&ManagerConfig>) -> Self {
        match config {
            Some(cfg) if cfg.has_client_secret() => Self::Registered,
            Some(_) => Self::AwaitingToken,
            None if has_identity => Self::Identified,
            None => Self::Unprovisioned,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Registered)
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unprovisioned => write!(f, "unprovisioned"),
            Self::Identified => write!(f, "identified"),
            Self::AwaitingToken => write!(f, "awaiting token"),
            Self::Registered => write!(f, "registered"),
        }
    }
}
