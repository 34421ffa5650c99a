//! Provider adapters.
//!
//! Every external data source sits behind [`Provider`]. Adapters own their
//! wire format, their HTTP client and its timeout; the scheduler only sees
//! a sparse [`ProviderResult`] or a [`ProviderError`].

pub mod abuseipdb;
pub mod internetdb;
pub mod ip_api;
pub mod ipinfo;
pub mod rdap;
pub mod tor;

use crate::error::{FailureKind, LookupFailure};
use crate::target::Target;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use reqwest::Client;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// What a provider contributes to a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderRole {
    /// Organization and country (primary and premium geo-IP).
    Geo,
    /// Legal block holder from the regional registry.
    Registry,
    /// Explicit Tor/VPN/proxy/hosting flags.
    Anonymity,
    /// Previously observed exposed ports and vulnerabilities.
    Risk,
}

impl fmt::Display for ProviderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderRole::Geo => write!(f, "geo"),
            ProviderRole::Registry => write!(f, "registry"),
            ProviderRole::Anonymity => write!(f, "anonymity"),
            ProviderRole::Risk => write!(f, "risk"),
        }
    }
}

/// Explicit anonymity flags. `None` means the provider did not say.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnonymitySignals {
    pub tor: Option<bool>,
    pub vpn: Option<bool>,
    pub proxy: Option<bool>,
    pub hosting: Option<bool>,
    pub relay: Option<bool>,
}

impl AnonymitySignals {
    /// Fold another provider's flags in. A positive answer from anyone wins.
    pub fn absorb(&mut self, other: &AnonymitySignals) {
        fn or(a: Option<bool>, b: Option<bool>) -> Option<bool> {
            match (a, b) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), _) | (_, Some(false)) => Some(false),
                (None, None) => None,
            }
        }

        self.tor = or(self.tor, other.tor);
        self.vpn = or(self.vpn, other.vpn);
        self.proxy = or(self.proxy, other.proxy);
        self.hosting = or(self.hosting, other.hosting);
        self.relay = or(self.relay, other.relay);
    }
}

/// Previously observed exposure facts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiskFacts {
    pub open_ports: Vec<u16>,
    pub vulnerabilities: Vec<String>,
}

/// Sparse result of one provider call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderResult {
    /// Which provider returned this result.
    pub provider: String,
    pub organization: Option<String>,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    /// Legal holder of the address block, from registry data.
    pub registry_holder: Option<String>,
    pub signals: AnonymitySignals,
    /// `Some` only when the provider actually performed a risk check.
    pub risk: Option<RiskFacts>,
    /// Raw response kept for detail reporting.
    pub payload: Option<serde_json::Value>,
}

impl ProviderResult {
    /// Create an empty result for `provider`.
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            ..Default::default()
        }
    }

    /// Set the organization; blank values stay unset.
    pub fn with_organization(mut self, organization: Option<String>) -> Self {
        self.organization = non_empty(organization);
        self
    }

    /// Set country code and name; blank values stay unset.
    pub fn with_country(mut self, code: Option<String>, name: Option<String>) -> Self {
        self.country_code = non_empty(code).map(|c| c.to_uppercase());
        self.country_name = non_empty(name);
        self
    }

    pub fn with_registry_holder(mut self, holder: Option<String>) -> Self {
        self.registry_holder = non_empty(holder);
        self
    }

    pub fn with_signals(mut self, signals: AnonymitySignals) -> Self {
        self.signals = signals;
        self
    }

    /// Mark as Tor exit node (or explicitly not).
    pub fn with_tor(mut self, is_tor: bool) -> Self {
        self.signals.tor = Some(is_tor);
        self
    }

    pub fn with_risk(mut self, facts: RiskFacts) -> Self {
        self.risk = Some(facts);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty() && v != "N/A")
}

/// Error from a provider.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited")]
    RateLimited {
        /// Provider's own hint for when to retry.
        retry_after: Option<Duration>,
    },

    #[error("{0}")]
    Declined(String),

    /// Non-success HTTP status other than a rate limit.
    #[error("HTTP {status}{}", body_suffix(.body))]
    Status { status: StatusCode, body: String },

    #[error("Invalid response: {0}")]
    UnexpectedResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else if e.is_decode() {
            ProviderError::UnexpectedResponse(e.to_string())
        } else {
            ProviderError::Http(e)
        }
    }
}

impl ProviderError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProviderError::RateLimited { .. })
    }

    /// Terminal failure this error maps to.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ProviderError::Http(_) | ProviderError::Timeout | ProviderError::Io(_) => {
                FailureKind::Network
            }
            // Only reachable when a caller gives up on a deferral
            ProviderError::RateLimited { .. } => FailureKind::Network,
            ProviderError::Status { status, .. } if status.is_server_error() => {
                FailureKind::Network
            }
            ProviderError::Status { .. } => FailureKind::UnexpectedResponse,
            ProviderError::Declined(_) => FailureKind::Declined,
            ProviderError::UnexpectedResponse(_) => FailureKind::UnexpectedResponse,
            ProviderError::Other(_) => FailureKind::Internal,
        }
    }
}

impl From<&ProviderError> for LookupFailure {
    fn from(e: &ProviderError) -> Self {
        LookupFailure::new(e.failure_kind(), e.to_string())
    }
}

/// Trait for lookup providers.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Look up a target. Never panics; every failure mode is an error value.
    async fn fetch(&self, target: &Target) -> Result<ProviderResult, ProviderError>;

    /// Provider name for logging and payload keys.
    fn name(&self) -> &str;

    fn role(&self) -> ProviderRole;

    /// Whether this provider is enabled.
    fn is_enabled(&self) -> bool;

    /// True when a lookup costs no per-target external call.
    fn is_local(&self) -> bool {
        false
    }

    /// Bring local state such as downloaded lists up to date. Called once
    /// before each batch, outside any per-call timeout.
    async fn prepare(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// Address of an IP target; providers only accept IPs.
pub(crate) fn target_ip(target: &Target) -> Result<IpAddr, ProviderError> {
    target
        .addr()
        .ok_or_else(|| ProviderError::Declined(format!("'{}' is not an IP address", target)))
}

/// HTTP client shared by the adapters' constructors.
pub(crate) fn http_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(format!("netblock-enrich/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(ProviderError::Http)
}

/// Error for a non-success response, keeping the start of the body.
pub(crate) async fn status_error(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    ProviderError::Status {
        status,
        body: body.trim().chars().take(200).collect(),
    }
}

fn body_suffix(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {}", body)
    }
}

/// Parse a seconds-valued retry hint header (`Retry-After`, `X-Ttl`).
pub(crate) fn retry_hint(headers: &HeaderMap, name: &str) -> Option<Duration> {
    headers
        .get(name)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_provider_result_builders() {
        let result = ProviderResult::new("test")
            .with_organization(Some("  Example Net ".to_string()))
            .with_country(Some("us".to_string()), Some("".to_string()))
            .with_tor(true);

        assert_eq!(result.provider, "test");
        assert_eq!(result.organization.as_deref(), Some("Example Net"));
        assert_eq!(result.country_code.as_deref(), Some("US"));
        assert!(result.country_name.is_none());
        assert_eq!(result.signals.tor, Some(true));
        assert!(result.risk.is_none());
    }

    #[test]
    fn test_na_values_stay_unset() {
        let result = ProviderResult::new("test").with_organization(Some("N/A".to_string()));
        assert!(result.organization.is_none());
    }

    #[test]
    fn test_signals_absorb() {
        let mut signals = AnonymitySignals {
            tor: Some(false),
            ..Default::default()
        };
        signals.absorb(&AnonymitySignals {
            tor: Some(true),
            proxy: Some(false),
            ..Default::default()
        });

        assert_eq!(signals.tor, Some(true));
        assert_eq!(signals.proxy, Some(false));
        assert_eq!(signals.vpn, None);
    }

    #[test]
    fn test_failure_kind_mapping() {
        assert_eq!(ProviderError::Timeout.failure_kind(), FailureKind::Network);
        assert_eq!(
            ProviderError::Declined("private range".into()).failure_kind(),
            FailureKind::Declined
        );
        assert_eq!(
            ProviderError::UnexpectedResponse("garbage".into()).failure_kind(),
            FailureKind::UnexpectedResponse
        );
        assert!(ProviderError::RateLimited { retry_after: None }.is_rate_limited());
    }

    #[test]
    fn test_server_error_is_network_failure() {
        let err = ProviderError::Status {
            status: StatusCode::SERVICE_UNAVAILABLE,
            body: String::new(),
        };
        assert_eq!(err.failure_kind(), FailureKind::Network);
        assert_eq!(
            LookupFailure::from(&err).to_string(),
            "Error: Network/Timeout (HTTP 503 Service Unavailable)"
        );

        let err = ProviderError::Status {
            status: StatusCode::FORBIDDEN,
            body: "invalid key".to_string(),
        };
        assert_eq!(err.failure_kind(), FailureKind::UnexpectedResponse);
        assert_eq!(err.to_string(), "HTTP 403 Forbidden: invalid key");
    }

    #[test]
    fn test_retry_hint() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Ttl", HeaderValue::from_static("42"));
        assert_eq!(retry_hint(&headers, "x-ttl"), Some(Duration::from_secs(42)));
        assert_eq!(retry_hint(&headers, "retry-after"), None);
    }

    #[test]
    fn test_target_ip_rejects_hostname() {
        let err = target_ip(&Target::parse("example.com")).unwrap_err();
        assert!(matches!(err, ProviderError::Declined(_)));
    }
}
