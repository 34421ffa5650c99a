//! ipinfo.io geo-IP provider (premium, token required).

use super::{
    http_client, retry_hint, status_error, target_ip, AnonymitySignals, Provider, ProviderError,
    ProviderResult, ProviderRole,
};
use crate::config::IpInfoConfig;
use crate::target::Target;
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// ipinfo.io response.
#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    /// "AS15169 Google LLC"
    #[serde(default)]
    org: Option<String>,

    #[serde(default)]
    country: Option<String>,

    /// Reserved/private address.
    #[serde(default)]
    bogon: bool,

    /// Only present on plans that include privacy detection.
    #[serde(default)]
    privacy: Option<IpInfoPrivacy>,
}

#[derive(Debug, Deserialize)]
struct IpInfoPrivacy {
    #[serde(default)]
    vpn: Option<bool>,
    #[serde(default)]
    proxy: Option<bool>,
    #[serde(default)]
    tor: Option<bool>,
    #[serde(default)]
    relay: Option<bool>,
    #[serde(default)]
    hosting: Option<bool>,
}

/// ipinfo.io provider.
pub struct IpInfoProvider {
    config: IpInfoConfig,
    client: Client,
}

impl IpInfoProvider {
    /// Create a new ipinfo provider.
    pub fn new(config: IpInfoConfig) -> Result<Self, ProviderError> {
        let client = http_client(Duration::from_millis(config.timeout_ms))?;
        Ok(Self { config, client })
    }
}

/// Strip the leading "AS1234 " from an ipinfo org string.
fn strip_asn(org: &str) -> String {
    static ASN_PREFIX: OnceLock<Option<Regex>> = OnceLock::new();
    match ASN_PREFIX.get_or_init(|| Regex::new(r"^AS\d+\s+").ok()) {
        Some(re) => re.replace(org, "").into_owned(),
        None => org.to_string(),
    }
}

fn interpret(provider: &str, body: &str) -> Result<ProviderResult, ProviderError> {
    let payload: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::UnexpectedResponse(format!("Failed to parse response: {}", e)))?;
    let parsed: IpInfoResponse = serde_json::from_value(payload.clone())
        .map_err(|e| ProviderError::UnexpectedResponse(format!("Failed to parse response: {}", e)))?;

    if parsed.bogon {
        return Err(ProviderError::Declined("bogon address".to_string()));
    }

    let signals = parsed
        .privacy
        .map(|p| AnonymitySignals {
            tor: p.tor,
            vpn: p.vpn,
            proxy: p.proxy,
            hosting: p.hosting,
            relay: p.relay,
        })
        .unwrap_or_default();

    Ok(ProviderResult::new(provider)
        .with_organization(parsed.org.as_deref().map(strip_asn))
        .with_country(parsed.country, None)
        .with_signals(signals)
        .with_payload(payload))
}

#[async_trait]
impl Provider for IpInfoProvider {
    async fn fetch(&self, target: &Target) -> Result<ProviderResult, ProviderError> {
        let ip = target_ip(target)?;
        let url = format!("{}/{}/json", self.config.base_url.trim_end_matches('/'), ip);

        debug!(ip = %ip, "Querying ipinfo");

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.token)
            .header("Accept", "application/json")
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_hint(response.headers(), "retry-after");
            warn!(ip = %ip, "ipinfo rate limit exceeded");
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body = response.text().await?;
        interpret(self.name(), &body)
    }

    fn name(&self) -> &str {
        "ipinfo"
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::Geo
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.token.is_empty()
    }
}
