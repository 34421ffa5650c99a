//! AbuseIPDB anonymity-intel provider.
//!
//! Contributes explicit Tor, public-proxy and hosting flags. The abuse
//! confidence score is kept in the payload for detail reporting only; it
//! does not influence the classification.

use super::{
    http_client, retry_hint, status_error, target_ip, AnonymitySignals, Provider, ProviderError,
    ProviderResult, ProviderRole,
};
use crate::config::AbuseIPDBConfig;
use crate::target::Target;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Usage types that indicate infrastructure rather than end users.
const HOSTING_USAGE_TYPES: &[&str] = &["Data Center", "Hosting", "Content Delivery Network"];

/// AbuseIPDB API response.
#[derive(Debug, Deserialize)]
struct AbuseIPDBResponse {
    data: AbuseIPDBData,
}

/// AbuseIPDB API response data.
#[derive(Debug, Deserialize)]
struct AbuseIPDBData {
    /// Abuse confidence score (0-100).
    #[serde(rename = "abuseConfidenceScore", default)]
    abuse_confidence_score: u8,

    #[serde(rename = "totalReports", default)]
    total_reports: u32,

    #[serde(rename = "isTor", default)]
    is_tor: Option<bool>,

    #[serde(rename = "isPublicProxy", default)]
    is_public_proxy: Option<bool>,

    #[serde(rename = "countryCode", default)]
    country_code: Option<String>,

    #[serde(default)]
    isp: Option<String>,

    /// Usage type (e.g., "Data Center/Web Hosting/Transit").
    #[serde(rename = "usageType", default)]
    usage_type: Option<String>,
}

/// AbuseIPDB provider.
pub struct AbuseIPDBProvider {
    config: AbuseIPDBConfig,
    client: Client,
}

impl AbuseIPDBProvider {
    /// Create a new AbuseIPDB provider.
    pub fn new(config: AbuseIPDBConfig) -> Result<Self, ProviderError> {
        let client = http_client(Duration::from_millis(config.timeout_ms))?;
        Ok(Self { config, client })
    }
}

fn interpret(provider: &str, body: &str) -> Result<ProviderResult, ProviderError> {
    let payload: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::UnexpectedResponse(format!("Failed to parse response: {}", e)))?;
    let api_response: AbuseIPDBResponse = serde_json::from_value(payload.clone())
        .map_err(|e| ProviderError::UnexpectedResponse(format!("Failed to parse response: {}", e)))?;

    let data = api_response.data;
    let hosting = data
        .usage_type
        .as_deref()
        .map(|usage| HOSTING_USAGE_TYPES.iter().any(|t| usage.contains(t)));

    debug!(
        score = data.abuse_confidence_score,
        reports = data.total_reports,
        is_tor = ?data.is_tor,
        is_proxy = ?data.is_public_proxy,
        usage_type = ?data.usage_type,
        "AbuseIPDB lookup complete"
    );

    Ok(ProviderResult::new(provider)
        .with_organization(data.isp)
        .with_country(data.country_code, None)
        .with_signals(AnonymitySignals {
            tor: data.is_tor,
            proxy: data.is_public_proxy,
            hosting,
            ..Default::default()
        })
        .with_payload(payload))
}

#[async_trait]
impl Provider for AbuseIPDBProvider {
    async fn fetch(&self, target: &Target) -> Result<ProviderResult, ProviderError> {
        let ip = target_ip(target)?;
        let url = format!(
            "{}/check?ipAddress={}&maxAgeInDays={}",
            self.config.base_url.trim_end_matches('/'),
            ip,
            self.config.max_age_days
        );

        debug!(ip = %ip, "Querying AbuseIPDB");

        let response = self
            .client
            .get(&url)
            .header("Key", &self.config.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_hint(response.headers(), "retry-after");
            warn!(ip = %ip, "AbuseIPDB rate limit exceeded");
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body = response.text().await?;
        interpret(self.name(), &body)
    }

    fn name(&self) -> &str {
        "abuseipdb"
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::Anonymity
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.api_key.is_empty()
    }
}
