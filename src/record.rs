//! Canonical per-target records and their status vocabulary.

use crate::error::LookupFailure;
use crate::locale::Rir;
use crate::target::Target;
use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

/// Where a successful record's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SuccessSource {
    Cache,
    Ipv4Api,
    Ipv6Api,
    /// Hostname target; no lookup is performed.
    Hostname,
    /// Lookups disabled for the batch.
    Offline,
}

impl fmt::Display for SuccessSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SuccessSource::Cache => write!(f, "Cache"),
            SuccessSource::Ipv4Api => write!(f, "IPv4 API"),
            SuccessSource::Ipv6Api => write!(f, "IPv6 API"),
            SuccessSource::Hostname => write!(f, "Domain"),
            SuccessSource::Offline => write!(f, "Offline"),
        }
    }
}

/// Lookup status of a record or aggregated range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupStatus {
    Success(SuccessSource),
    Failed(LookupFailure),
    /// Waiting out a rate limit. Only seen in progress and unresolved
    /// reporting, never on a finished record.
    Deferred { retry_in: Duration },
    /// A range built from this many records.
    Aggregated(usize),
}

impl LookupStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, LookupStatus::Success(_))
    }
}

impl fmt::Display for LookupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupStatus::Success(source) => write!(f, "Success ({})", source),
            LookupStatus::Failed(failure) => write!(f, "{}", failure),
            LookupStatus::Deferred { retry_in } => {
                // Round up so a pending target never claims "Retry in 0s"
                let secs = retry_in.as_secs() + u64::from(retry_in.subsec_nanos() > 0);
                write!(f, "Pending (Retry in {}s)", secs)
            }
            LookupStatus::Aggregated(n) => write!(f, "Aggregated ({} IPs)", n),
        }
    }
}

impl Serialize for LookupStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Anonymity classification of a target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnonymityClass {
    #[default]
    Standard,
    Hosting,
    VpnProxy,
    TorExit,
    PrivacyRelay,
}

impl AnonymityClass {
    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            AnonymityClass::Standard => "Standard Connection",
            AnonymityClass::Hosting => "Hosting/DataCenter",
            AnonymityClass::VpnProxy => "VPN/Proxy",
            AnonymityClass::TorExit => "Tor Exit Node",
            AnonymityClass::PrivacyRelay => "Privacy Relay",
        }
    }

    pub fn is_anonymous(&self) -> bool {
        *self != AnonymityClass::Standard
    }
}

impl fmt::Display for AnonymityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of the risk check. `Checked` with an empty set means a provider
/// looked and found nothing, which is different from not looking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "signals", rename_all = "snake_case")]
pub enum RiskAssessment {
    #[default]
    NotChecked,
    Checked(BTreeSet<String>),
}

/// One merged record per unique target.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRecord {
    pub target: Target,
    pub organization_raw: Option<String>,
    pub organization_localized: Option<String>,
    /// Legal block holder when it differs from the operator name.
    pub registry_holder: Option<String>,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub regional_registry: Option<Rir>,
    pub status: LookupStatus,
    pub anonymity: AnonymityClass,
    pub risk: RiskAssessment,
    /// Raw provider responses keyed by provider name.
    pub provider_payloads: BTreeMap<String, serde_json::Value>,
    /// Non-fatal enrichment failures keyed by provider name.
    pub provider_errors: BTreeMap<String, String>,
}

impl CanonicalRecord {
    /// Empty record with the given status.
    pub fn new(target: Target, status: LookupStatus) -> Self {
        Self {
            target,
            organization_raw: None,
            organization_localized: None,
            registry_holder: None,
            country_code: None,
            country_name: None,
            regional_registry: None,
            status,
            anonymity: AnonymityClass::Standard,
            risk: RiskAssessment::NotChecked,
            provider_payloads: BTreeMap::new(),
            provider_errors: BTreeMap::new(),
        }
    }

    pub fn hostname(target: Target) -> Self {
        Self::new(target, LookupStatus::Success(SuccessSource::Hostname))
    }

    pub fn offline(target: Target) -> Self {
        Self::new(target, LookupStatus::Success(SuccessSource::Offline))
    }

    pub fn failed(target: Target, failure: LookupFailure) -> Self {
        Self::new(target, LookupStatus::Failed(failure))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn test_status_display() {
        assert_eq!(
            LookupStatus::Success(SuccessSource::Cache).to_string(),
            "Success (Cache)"
        );
        assert_eq!(
            LookupStatus::Success(SuccessSource::Ipv6Api).to_string(),
            "Success (IPv6 API)"
        );
        assert_eq!(
            LookupStatus::Success(SuccessSource::Hostname).to_string(),
            "Success (Domain)"
        );
        assert_eq!(LookupStatus::Aggregated(3).to_string(), "Aggregated (3 IPs)");
        assert_eq!(
            LookupStatus::Deferred {
                retry_in: Duration::from_millis(119_200)
            }
            .to_string(),
            "Pending (Retry in 120s)"
        );
    }

    #[test]
    fn test_status_serializes_as_display_string() {
        let status = LookupStatus::Failed(LookupFailure::new(FailureKind::Declined, "private range"));
        assert_eq!(
            serde_json::to_value(&status).unwrap(),
            serde_json::json!("API Fail: private range")
        );
    }

    #[test]
    fn test_risk_serialization_distinguishes_unchecked() {
        let unchecked = serde_json::to_value(RiskAssessment::NotChecked).unwrap();
        let empty = serde_json::to_value(RiskAssessment::Checked(BTreeSet::new())).unwrap();
        assert_eq!(unchecked, serde_json::json!({"state": "not_checked"}));
        assert_eq!(empty, serde_json::json!({"state": "checked", "signals": []}));
    }

    #[test]
    fn test_hostname_record() {
        let record = CanonicalRecord::hostname(Target::parse("example.com"));
        assert!(record.status.is_success());
        assert!(record.organization_raw.is_none());
        assert_eq!(record.anonymity, AnonymityClass::Standard);
        assert!(!record.anonymity.is_anonymous());
    }
}
