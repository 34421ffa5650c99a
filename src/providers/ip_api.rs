//! ip-api.com geo-IP provider (primary, free tier).
//!
//! The free endpoint allows roughly 45 requests per minute per client IP and
//! answers HTTP 429 once the quota is spent. `X-Ttl` carries the number of
//! seconds until the window resets.

use super::{
    http_client, retry_hint, status_error, target_ip, Provider, ProviderError, ProviderResult,
    ProviderRole,
};
use crate::config::IpApiConfig;
use crate::target::Target;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const FIELDS: &str = "status,message,country,countryCode,isp,org,as,query";

/// ip-api.com response.
#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,

    #[serde(default)]
    message: Option<String>,

    #[serde(default)]
    country: Option<String>,

    #[serde(rename = "countryCode", default)]
    country_code: Option<String>,

    #[serde(default)]
    isp: Option<String>,

    #[serde(default)]
    org: Option<String>,
}

/// ip-api.com geo-IP provider.
pub struct IpApiProvider {
    config: IpApiConfig,
    client: Client,
}

impl IpApiProvider {
    /// Create a new ip-api provider.
    pub fn new(config: IpApiConfig) -> Result<Self, ProviderError> {
        let client = http_client(Duration::from_millis(config.timeout_ms))?;
        Ok(Self { config, client })
    }

    fn url(&self, ip: &std::net::IpAddr) -> String {
        format!(
            "{}/{}?fields={}",
            self.config.base_url.trim_end_matches('/'),
            ip,
            FIELDS
        )
    }
}

/// Interpret a 2xx body.
fn interpret(provider: &str, body: &str) -> Result<ProviderResult, ProviderError> {
    let payload: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::UnexpectedResponse(format!("Failed to parse response: {}", e)))?;
    let parsed: IpApiResponse = serde_json::from_value(payload.clone())
        .map_err(|e| ProviderError::UnexpectedResponse(format!("Failed to parse response: {}", e)))?;

    match parsed.status.as_str() {
        "success" => Ok(ProviderResult::new(provider)
            .with_organization(parsed.isp.filter(|s| !s.trim().is_empty()).or(parsed.org))
            .with_country(parsed.country_code, parsed.country)
            .with_payload(payload)),
        "fail" => Err(ProviderError::Declined(
            parsed.message.unwrap_or_else(|| "Unknown Fail".to_string()),
        )),
        other => Err(ProviderError::UnexpectedResponse(format!(
            "unknown status '{}'",
            other
        ))),
    }
}

#[async_trait]
impl Provider for IpApiProvider {
    async fn fetch(&self, target: &Target) -> Result<ProviderResult, ProviderError> {
        let ip = target_ip(target)?;

        debug!(ip = %ip, "Querying ip-api");

        let response = self.client.get(self.url(&ip)).send().await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_hint(response.headers(), "x-ttl");
            warn!(ip = %ip, retry_after = ?retry_after, "ip-api rate limit exceeded");
            return Err(ProviderError::RateLimited { retry_after });
        }

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let body = response.text().await?;
        let result = interpret(self.name(), &body)?;

        debug!(
            ip = %ip,
            organization = ?result.organization,
            country = ?result.country_code,
            "ip-api lookup complete"
        );

        Ok(result)
    }

    fn name(&self) -> &str {
        "ip-api"
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::Geo
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> IpApiConfig {
        IpApiConfig {
            enabled: true,
            base_url: "http://ip-api.com/json/".to_string(),
            timeout_ms: 5000,
        }
    }

    #[test]
    fn test_interpret_success() {
        let body = r#"{"status":"success","country":"Japan","countryCode":"JP",
            "isp":"NTT Communications Corporation","org":"OCN","as":"AS4713","query":"203.0.113.1"}"#;

        let result = interpret("ip-api", body).unwrap();
        assert_eq!(result.provider, "ip-api");
        assert_eq!(result.organization.as_deref(), Some("NTT Communications Corporation"));
        assert_eq!(result.country_code.as_deref(), Some("JP"));
        assert_eq!(result.country_name.as_deref(), Some("Japan"));
        assert!(result.payload.is_some());
        assert!(result.risk.is_none());
    }

    #[test]
    fn test_interpret_falls_back_to_org() {
        let body = r#"{"status":"success","countryCode":"US","isp":"","org":"Example Org"}"#;
        let result = interpret("ip-api", body).unwrap();
        assert_eq!(result.organization.as_deref(), Some("Example Org"));
    }

    #[test]
    fn test_interpret_fail_is_declined() {
        let body = r#"{"status":"fail","message":"reserved range","query":"10.0.0.1"}"#;
        let err = interpret("ip-api", body).unwrap_err();
        match err {
            ProviderError::Declined(msg) => assert_eq!(msg, "reserved range"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_interpret_garbage() {
        assert!(matches!(
            interpret("ip-api", "<html>"),
            Err(ProviderError::UnexpectedResponse(_))
        ));
        assert!(matches!(
            interpret("ip-api", r#"{"status":"maybe"}"#),
            Err(ProviderError::UnexpectedResponse(_))
        ));
    }

    #[test]
    fn test_url() {
        let provider = IpApiProvider::new(create_test_config()).unwrap();
        let url = provider.url(&"8.8.8.8".parse().unwrap());
        assert_eq!(
            url,
            "http://ip-api.com/json/8.8.8.8?fields=status,message,country,countryCode,isp,org,as,query"
        );
    }

    #[test]
    fn test_provider_metadata() {
        let provider = IpApiProvider::new(create_test_config()).unwrap();
        assert_eq!(provider.name(), "ip-api");
        assert_eq!(provider.role(), ProviderRole::Geo);
        assert!(provider.is_enabled());
        assert!(!provider.is_local());
    }
}
