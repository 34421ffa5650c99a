//! RDAP registry lookup of the legal block holder.
//!
//! `rdap.org` redirects to the authoritative RIR server. The holder is taken
//! from the registrant (or administrative) entity's vCard `fn`, falling back
//! to the entity handle and then to the network name.

use super::{
    http_client, retry_hint, status_error, target_ip, Provider, ProviderError, ProviderResult,
    ProviderRole,
};
use crate::config::RdapConfig;
use crate::target::Target;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

/// RDAP registry provider.
pub struct RdapProvider {
    config: RdapConfig,
    client: Client,
}

impl RdapProvider {
    /// Create a new RDAP provider.
    pub fn new(config: RdapConfig) -> Result<Self, ProviderError> {
        let client = http_client(Duration::from_millis(config.timeout_ms))?;
        Ok(Self { config, client })
    }
}

fn interpret(provider: &str, body: &str) -> Result<ProviderResult, ProviderError> {
    let v: Value = serde_json::from_str(body)
        .map_err(|e| ProviderError::UnexpectedResponse(format!("Failed to parse response: {}", e)))?;

    if !v.is_object() {
        return Err(ProviderError::UnexpectedResponse(
            "RDAP response is not an object".to_string(),
        ));
    }

    let holder = entity_name(&v).or_else(|| str_field(&v, "name"));
    let country = str_field(&v, "country");

    Ok(ProviderResult::new(provider)
        .with_registry_holder(holder)
        .with_country(country, None)
        .with_payload(v))
}

fn str_field(v: &Value, key: &str) -> Option<String> {
    v.get(key).and_then(Value::as_str).map(str::to_string)
}

fn entity_name(v: &Value) -> Option<String> {
    let entities = v.get("entities")?.as_array()?;

    let holder = entities.iter().find(|entity| {
        entity
            .get("roles")
            .and_then(Value::as_array)
            .is_some_and(|roles| {
                roles
                    .iter()
                    .filter_map(Value::as_str)
                    .any(|role| role == "registrant" || role == "administrative")
            })
    });

    holder
        .or_else(|| entities.first())
        .and_then(|e| vcard_name(e).or_else(|| str_field(e, "handle")))
}

fn vcard_name(entity: &Value) -> Option<String> {
    let entries = entity.get("vcardArray")?.as_array()?.get(1)?.as_array()?;
    entries
        .iter()
        .filter_map(Value::as_array)
        .find(|entry| entry.first().and_then(Value::as_str) == Some("fn"))
        .and_then(|entry| entry.get(3))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl Provider for RdapProvider {
    async fn fetch(&self, target: &Target) -> Result<ProviderResult, ProviderError> {
        let ip = target_ip(target)?;
        let url = format!("{}/ip/{}", self.config.base_url.trim_end_matches('/'), ip);

        debug!(ip = %ip, "Querying RDAP");

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/rdap+json")
            .send()
            .await?;

        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = retry_hint(response.headers(), "retry-after");
                warn!(ip = %ip, "RDAP rate limit exceeded");
                Err(ProviderError::RateLimited { retry_after })
            }
            StatusCode::NOT_FOUND => Err(ProviderError::Declined(format!(
                "no registry record for {}",
                ip
            ))),
            status if !status.is_success() => Err(status_error(response).await),
            _ => {
                let body = response.text().await?;
                interpret(self.name(), &body)
            }
        }
    }

    fn name(&self) -> &str {
        "rdap"
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::Registry
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}
