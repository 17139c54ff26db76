//! Manager-issued configuration document.
//!
//! The document is produced by the fleet manager during pairing, pasted by the
//! operator, persisted as `zaas.json`, and mutated exactly once locally when the
//! short-lived SSO token is exchanged for a client secret.
//!
//! Every way of obtaining a [`ManagerConfig`] goes through validation: the
//! `Deserialize` impl routes through `RawManagerConfig` and `TryFrom`, so a
//! value that exists is a value that passed [`ManagerConfig::from_json`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::InstanceIdentity;

/// Schema or validation failure for a manager configuration document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("not a valid configuration document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("field '{field}' {reason}")]
    Field { field: &'static str, reason: String },
    #[error("sso.token and sso.client_secret must not both be set")]
    TokenWithSecret,
}

/// SSO provider section of the manager configuration.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SsoConfig {
    pub provider_url: String,
    pub registration_path: String,
    pub token_path: String,
    pub client_id: String,
    /// Short-lived token, present only during the exchange window.
    #[serde(default)]
    pub token: Option<String>,
    /// Long-lived credential, present forever once the exchange succeeded.
    #[serde(default)]
    pub client_secret: Option<String>,
}

impl fmt::Debug for SsoConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SsoConfig")
            .field("provider_url", &self.provider_url)
            .field("registration_path", &self.registration_path)
            .field("token_path", &self.token_path)
            .field("client_id", &self.client_id)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Validated manager configuration, persisted at `<config_dir>/zaas.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawManagerConfig")]
pub struct ManagerConfig {
    pub manager_url: String,
    pub api_path: String,
    /// Identifier echoed by the manager. Informational only: the locally
    /// generated identity is authoritative.
    pub instance_id: Option<InstanceIdentity>,
    pub hostname: String,
    pub sso: SsoConfig,
    /// Set in the same write that stores `client_secret`; cleared once the
    /// fleet manager acknowledged the registration.
    #[serde(skip_serializing_if = "is_false")]
    pub registration_pending: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Unvalidated wire shape. Only ever converted through `TryFrom`.
#[derive(Deserialize)]
struct RawManagerConfig {
    manager_url: String,
    api_path: String,
    #[serde(default, alias = "uuid")]
    instance_id: Option<InstanceIdentity>,
    hostname: String,
    sso: SsoConfig,
    #[serde(default)]
    registration_pending: bool,
}

impl TryFrom<RawManagerConfig> for ManagerConfig {
    type Error = ConfigError;

    fn try_from(raw: RawManagerConfig) -> Result<Self, Self::Error> {
        let mut sso = raw.sso;
        sso.token = non_blank(sso.token);
        sso.client_secret = non_blank(sso.client_secret);

        require_url("manager_url", &raw.manager_url)?;
        require_non_empty("api_path", &raw.api_path)?;
        require_non_empty("hostname", &raw.hostname)?;
        require_url("sso.provider_url", &sso.provider_url)?;
        require_non_empty("sso.registration_path", &sso.registration_path)?;
        require_non_empty("sso.client_id", &sso.client_id)?;

        if sso.token.is_some() && sso.client_secret.is_some() {
            return Err(ConfigError::TokenWithSecret);
        }

        Ok(Self {
            manager_url: raw.manager_url,
            api_path: raw.api_path,
            instance_id: raw.instance_id,
            hostname: raw.hostname,
            registration_pending: raw.registration_pending && sso.client_secret.is_some(),
            sso,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Field {
            field,
            reason: "must not be empty".to_string(),
        });
    }
    Ok(())
}

fn require_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    require_non_empty(field, value)?;
    if !(value.starts_with("http://") || value.starts_with("https://")) {
        return Err(ConfigError::Field {
            field,
            reason: format!("must be an http(s) URL, got '{}'", value),
        });
    }
    Ok(())
}

impl ManagerConfig {
    /// Parse and validate a configuration document.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Self::from_slice(text.as_bytes())
    }

    /// Parse and validate raw bytes. Invalid UTF-8 is a [`ConfigError::Json`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        let raw: RawManagerConfig = serde_json::from_slice(bytes)?;
        Self::try_from(raw)
    }

    /// Serialize for persistence (pretty-printed, trailing newline).
    pub fn to_json(&self) -> Result<String, ConfigError> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    /// The short-lived token, if one is present and non-blank.
    pub fn usable_token(&self) -> Option<&str> {
        self.sso.token.as_deref()
    }

    pub fn has_client_secret(&self) -> bool {
        self.sso.client_secret.is_some()
    }

    /// `GET` target at the SSO provider that trades the token for a secret.
    pub fn secret_exchange_url(&self) -> String {
        format!(
            "{}{}/{}",
            self.sso.provider_url, self.sso.registration_path, self.sso.client_id
        )
    }

    /// `POST` target at the fleet manager for registering `identity`.
    pub fn registration_url(&self, identity: &InstanceIdentity) -> String {
        format!("{}{}/{}/register", self.manager_url, self.api_path, identity)
    }

    /// Record a successful exchange: the secret is stored, the token dropped,
    /// and registration becomes pending, all in one mutation.
    pub fn complete_exchange(&mut self, client_secret: String) {
        self.sso.token = None;
        self.sso.client_secret = Some(client_secret);
        self.registration_pending = true;
    }

    /// Record that the fleet manager acknowledged the registration.
    pub fn mark_registered(&mut self) {
        self.registration_pending = false;
    }

    /// Overwrite the manager-supplied identifier with the local one.
    ///
    /// Returns the previous value when it disagreed with `identity`.
    pub fn adopt_identity(&mut self, identity: InstanceIdentity) -> Option<InstanceIdentity> {
        let previous = self.instance_id.replace(identity);
        previous.filter(|p| *p != identity)
    }
}
