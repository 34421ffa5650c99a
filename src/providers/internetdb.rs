//! Shodan InternetDB risk-intel provider.
//!
//! Reports ports and vulnerabilities Shodan has already observed for an
//! address. No live scan is made. A 404 means the address was checked and
//! nothing is known about it.

use super::{
    http_client, retry_hint, status_error, target_ip, AnonymitySignals, Provider, ProviderError,
    ProviderResult, ProviderRole, RiskFacts,
};
use crate::config::InternetDbConfig;
use crate::target::Target;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct InternetDbResponse {
    #[serde(default)]
    ports: Vec<u16>,

    #[serde(default)]
    vulns: Vec<String>,

    /// e.g. "vpn", "proxy", "tor", "cloud", "self-signed"
    #[serde(default)]
    tags: Vec<String>,
}

/// InternetDB provider.
pub struct InternetDbProvider {
    config: InternetDbConfig,
    client: Client,
}

impl InternetDbProvider {
    /// Create a new InternetDB provider.
    pub fn new(config: InternetDbConfig) -> Result<Self, ProviderError> {
        let client = http_client(Duration::from_millis(config.timeout_ms))?;
        Ok(Self { config, client })
    }
}

/// Tags only ever set a flag, never clear one.
fn tag_signals(tags: &[String]) -> AnonymitySignals {
    let has = |name: &str| tags.iter().any(|t| t.eq_ignore_ascii_case(name)).then_some(true);

    AnonymitySignals {
        tor: has("tor"),
        vpn: has("vpn"),
        proxy: has("proxy"),
        hosting: has("cloud"),
        relay: None,
    }
}

fn interpret(provider: &str, body: &str) -> Result<ProviderResult, ProviderError> {
    let payload: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::UnexpectedResponse(format!("Failed to parse response: {}", e)))?;
    let parsed: InternetDbResponse = serde_json::from_value(payload.clone())
        .map_err(|e| ProviderError::UnexpectedResponse(format!("Failed to parse response: {}", e)))?;

    let mut open_ports = parsed.ports;
    open_ports.sort_unstable();
    open_ports.dedup();

    Ok(ProviderResult::new(provider)
        .with_signals(tag_signals(&parsed.tags))
        .with_risk(RiskFacts {
            open_ports,
            vulnerabilities: parsed.vulns,
        })
        .with_payload(payload))
}

#[async_trait]
impl Provider for InternetDbProvider {
    async fn fetch(&self, target: &Target) -> Result<ProviderResult, ProviderError> {
        let ip = target_ip(target)?;
        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), ip);

        debug!(ip = %ip, "Querying InternetDB");

        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!(ip = %ip, "No InternetDB data");
                Ok(ProviderResult::new(self.name()).with_risk(RiskFacts::default()))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = retry_hint(response.headers(), "retry-after");
                warn!(ip = %ip, "InternetDB rate limit exceeded");
                Err(ProviderError::RateLimited { retry_after })
            }
            status if !status.is_success() => Err(status_error(response).await),
            _ => {
                let body = response.text().await?;
                interpret(self.name(), &body)
            }
        }
    }

    fn name(&self) -> &str {
        "internetdb"
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::Risk
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}
