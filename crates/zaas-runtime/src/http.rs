use std::time::Duration;

use reqwest::blocking::{Client, ClientBuilder};
use reqwest::redirect::Policy;

const MAX_PROVIDER_REDIRECTS: usize = 10;

fn builder(timeout: Duration) -> ClientBuilder {
    Client::builder()
        .user_agent(concat!("zaas-bootstrap/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
}

/// Client for the SSO provider. Redirects are followed.
pub fn provider_client(timeout: Duration) -> reqwest::Result<Client> {
    builder(timeout)
        .redirect(Policy::limited(MAX_PROVIDER_REDIRECTS))
        .build()
}

/// Client for the fleet manager.
///
/// Redirects are never followed: a redirect from the registration endpoint is
/// reported to the operator as a misconfiguration.
pub fn manager_client(timeout: Duration) -> reqwest::Result<Client> {
    builder(timeout).redirect(Policy::none()).build()
}
