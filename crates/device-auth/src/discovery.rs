//! OIDC endpoint discovery
//!
//! Resolves the device authorization and token endpoints from the issuer's
//! `/.well-known/openid-configuration` document. Endpoints are looked up on
//! every attempt and never cached.

use std::time::Duration;

use reqwest::header::ACCEPT;
use serde::Deserialize;
use tracing::debug;

use crate::constants::WELL_KNOWN_PATH;
use crate::error::{Error, Result};

/// Endpoints the device flow talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub device_authorization_endpoint: String,
    pub token_endpoint: String,
}

/// Subset of the provider metadata document we need.
#[derive(Debug, Deserialize)]
struct ProviderMetadata {
    #[serde(default)]
    device_authorization_endpoint: Option<String>,
    #[serde(default)]
    token_endpoint: Option<String>,
}

/// Discovery document URL for an issuer.
pub fn discovery_url(issuer: &str) -> String {
    format!("{}{WELL_KNOWN_PATH}", issuer.trim_end_matches('/'))
}

/// Fetch the issuer's metadata and extract the device flow endpoints.
///
/// Any failure is fatal: a non-200 status, an unparsable document, or a
/// document missing either endpoint.
pub async fn discover(
    client: &reqwest::Client,
    issuer: &str,
    timeout: Duration,
) -> Result<Endpoints> {
    let url = discovery_url(issuer);
    let response = client
        .get(&url)
        .header(ACCEPT, "application/json")
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| Error::Http(format!("discovery request to {url} failed: {e}")))?;

    let status = response.status();
    if status.as_u16() != 200 {
        return Err(Error::Discovery(format!(
            "could not retrieve endpoints from {url}, response code: {status}"
        )));
    }

    let metadata: ProviderMetadata = response
        .json()
        .await
        .map_err(|e| Error::Discovery(format!("invalid metadata document at {url}: {e}")))?;

    let token_endpoint = metadata
        .token_endpoint
        .ok_or_else(|| Error::Discovery(format!("{url} is missing token_endpoint")))?;
    let device_authorization_endpoint = metadata.device_authorization_endpoint.ok_or_else(|| {
        Error::Discovery(format!("{url} is missing device_authorization_endpoint"))
    })?;

    debug!(
        issuer,
        %device_authorization_endpoint,
        %token_endpoint,
        "discovered endpoints"
    );

    Ok(Endpoints {
        device_authorization_endpoint,
        token_endpoint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockIdp;
    use std::sync::atomic::Ordering;

    #[test]
    fn discovery_url_strips_trailing_slash() {
        assert_eq!(
            discovery_url("https://idp.example.com/realms/db/"),
            "https://idp.example.com/realms/db/.well-known/openid-configuration"
        );
    }

    #[tokio::test]
    async fn discovers_both_endpoints() {
        let idp = MockIdp::start().await;
        let endpoints = discover(&reqwest::Client::new(), &idp.issuer(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(endpoints.token_endpoint, format!("{}/token", idp.issuer()));
        assert_eq!(
            endpoints.device_authorization_endpoint,
            format!("{}/devicecode", idp.issuer())
        );
        assert_eq!(idp.counters.discovery.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_200_is_fatal_and_carries_status() {
        let idp = MockIdp::start().await;
        idp.set_discovery_status(404);
        let err = discover(&reqwest::Client::new(), &idp.issuer(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Discovery(_)), "got: {err:?}");
        assert!(err.to_string().contains("404"), "got: {err}");
    }

    #[tokio::test]
    async fn missing_device_endpoint_is_fatal() {
        let idp = MockIdp::start().await;
        idp.omit_device_endpoint();
        let err = discover(&reqwest::Client::new(), &idp.issuer(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(
            err.to_string().contains("device_authorization_endpoint"),
            "got: {err}"
        );
        assert_eq!(idp.counters.discovery.load(Ordering::SeqCst), 1, "no retry");
    }

    #[tokio::test]
    async fn unreachable_issuer_is_http_error() {
        let err = discover(
            &reqwest::Client::new(),
            "http://127.0.0.1:1",
            Duration::from_secs(2),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Http(_)), "got: {err:?}");
    }
}
