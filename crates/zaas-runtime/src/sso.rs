//! Credential exchange with the SSO provider and registration with the fleet manager.
//!
//! Neither call is retried: a failure is reported and the operator re-runs the
//! tool once the cause is fixed.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use reqwest::header::LOCATION;
use serde::Deserialize;
use tracing::debug;
use zaas_core::manager::ManagerConfig;
use zaas_core::telemetry::HostTelemetry;

use crate::error::BootstrapError;
use crate::http;

/// Network side of the bootstrap.
pub trait SsoClient {
    /// Trade the short-lived `token` for the long-lived client secret.
    fn exchange_token(&self, cfg: &ManagerConfig, token: &str) -> Result<String, BootstrapError>;

    /// Announce this instance and its telemetry to the fleet manager.
    fn register_instance(
        &self,
        cfg: &ManagerConfig,
        telemetry: &HostTelemetry,
    ) -> Result<RegistrationAck, BootstrapError>;
}

/// Body of a successful (`200`) registration response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationAck {
    pub body: String,
}

#[derive(Deserialize)]
struct SecretResponse {
    #[serde(default)]
    secret: Option<String>,
}

/// [`SsoClient`] over blocking HTTP.
pub struct HttpSsoClient {
    provider: Client,
    manager: Client,
}

impl HttpSsoClient {
    pub fn new(provider: Client, manager: Client) -> Self {
        Self { provider, manager }
    }

    /// Clients from [`crate::http`] sharing one request timeout.
    pub fn with_timeout(timeout: Duration) -> reqwest::Result<Self> {
        Ok(Self::new(
            http::provider_client(timeout)?,
            http::manager_client(timeout)?,
        ))
    }
}

impl SsoClient for HttpSsoClient {
    fn exchange_token(&self, cfg: &ManagerConfig, token: &str) -> Result<String, BootstrapError> {
        let url = cfg.secret_exchange_url();
        debug!(%url, "requesting client secret");

        let resp = self
            .provider
            .get(&url)
            .bearer_auth(token)
            .header("Accept", "application/json")
            .send()
            .map_err(|source| transport(&url, source))?;

        let status = resp.status();
        let body = read_body(resp, &url)?;
        if !status.is_success() {
            return Err(BootstrapError::SsoProvider {
                status: status.as_u16(),
                body,
            });
        }

        parse_secret(&body).ok_or(BootstrapError::MissingSecret)
    }

    fn register_instance(
        &self,
        cfg: &ManagerConfig,
        telemetry: &HostTelemetry,
    ) -> Result<RegistrationAck, BootstrapError> {
        let url = cfg.registration_url(&telemetry.instance_id);
        debug!(%url, "registering instance");

        let mut req = self.manager.post(&url).json(telemetry);
        if let Some(secret) = cfg.sso.client_secret.as_deref() {
            req = req.basic_auth(&cfg.sso.client_id, Some(secret));
        }
        let resp = req.send().map_err(|source| transport(&url, source))?;

        let status = resp.status();
        let location = resp
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = read_body(resp, &url)?;

        match status {
            StatusCode::OK => Ok(RegistrationAck { body }),
            StatusCode::FOUND => Err(BootstrapError::ManagerRegistration {
                status: status.as_u16(),
                detail: format!(
                    "redirected to {}",
                    location.as_deref().unwrap_or("<no Location header>")
                ),
            }),
            _ => Err(BootstrapError::ManagerRegistration {
                status: status.as_u16(),
                detail: if body.is_empty() {
                    "<empty body>".to_string()
                } else {
                    body
                },
            }),
        }
    }
}

fn read_body(resp: Response, url: &str) -> Result<String, BootstrapError> {
    resp.text()
        .map(|b| b.trim().to_string())
        .map_err(|source| transport(url, source))
}

fn parse_secret(body: &str) -> Option<String> {
    serde_json::from_str::<SecretResponse>(body)
        .ok()
        .and_then(|r| r.secret)
        .filter(|s| !s.trim().is_empty())
}

fn transport(endpoint: &str, source: reqwest::Error) -> BootstrapError {
    BootstrapError::Transport {
        endpoint: endpoint.to_string(),
        source,
    }
}
