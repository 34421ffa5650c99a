//! Result merging and anonymity classification.
//!
//! Provider results arrive sparse and in priority order (geo providers
//! first, then enrichment). The merger picks the first non-empty value per
//! field and derives the anonymity class from explicit flags before falling
//! back to organization-name keywords.

use crate::cache::CacheEntry;
use crate::locale::{normalize_org, regional_registry, Locale};
use crate::providers::{AnonymitySignals, ProviderResult};
use crate::record::{AnonymityClass, CanonicalRecord, LookupStatus, RiskAssessment, SuccessSource};
use crate::target::{Target, TargetKind};
use std::collections::BTreeSet;

/// Organization-name keyword rules, evaluated top to bottom; first match wins.
const KEYWORD_RULES: &[(&[&str], AnonymityClass)] = &[
    (&["icloud", "private relay"], AnonymityClass::PrivacyRelay),
    (
        &[
            "vpn",
            "proxy",
            "applied privacy",
            "privacy foundation",
            "calyx institute",
            "expressvpn",
            "nordvpn",
            "proton",
            "mullvad",
            "private internet access",
            "windscribe",
            "cyberghost",
            "torguard",
            "purevpn",
        ],
        AnonymityClass::VpnProxy,
    ),
    // CDN edges front arbitrary origins
    (
        &["cloudflare", "akamai", "fastly", "cloudfront"],
        AnonymityClass::VpnProxy,
    ),
    (
        &[
            "hosting", "datacenter", "vps", "cloud", "server", "dedi",
            "amazon technologies", "amazon.com", "google llc", "google cloud",
            "microsoft corporation", "azure", "oracle cloud", "alibaba", "tencent",
            "huawei", "digitalocean", "linode", "vultr", "ovh", "hetzner", "m247",
            "proweb", "choopa", "leaseweb", "datacamp", "ip-volume", "flyservers",
            "performive", "hostroyale", "packet exchange", "xtom", "tzulo", "psychz",
            "franantech", "buyvm", "melbicom", "pfcloud", "epyc", "layerhost",
            "cdn77", "imperva", "incapsula",
        ],
        AnonymityClass::Hosting,
    ),
];

/// Classify from the organization name alone.
pub fn classify_by_keywords(organization: &str) -> AnonymityClass {
    let lower = organization.to_lowercase();
    KEYWORD_RULES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(_, class)| *class)
        .unwrap_or_default()
}

/// Explicit flags win over keywords: Tor, then relay, then VPN/proxy, then
/// hosting.
pub fn classify_anonymity(signals: &AnonymitySignals, organization: Option<&str>) -> AnonymityClass {
    let flagged = |flag: Option<bool>| flag == Some(true);

    if flagged(signals.tor) {
        AnonymityClass::TorExit
    } else if flagged(signals.relay) {
        AnonymityClass::PrivacyRelay
    } else if flagged(signals.vpn) || flagged(signals.proxy) {
        AnonymityClass::VpnProxy
    } else if flagged(signals.hosting) {
        AnonymityClass::Hosting
    } else {
        organization.map(classify_by_keywords).unwrap_or_default()
    }
}

/// Merge provider results for one target into a canonical record.
pub fn merge(target: &Target, results: &[ProviderResult], locale: Locale) -> CanonicalRecord {
    let source = match target.kind() {
        TargetKind::Ipv6 => SuccessSource::Ipv6Api,
        _ => SuccessSource::Ipv4Api,
    };
    let mut record = CanonicalRecord::new(target.clone(), LookupStatus::Success(source));

    let organization = first(results, |r| r.organization.as_deref());
    let holder = first(results, |r| r.registry_holder.as_deref());
    let country_code = first(results, |r| r.country_code.as_deref());
    let country_name = first(results, |r| r.country_name.as_deref());

    match (organization, holder) {
        (Some(org), Some(holder)) => {
            record.organization_raw = Some(org.to_string());
            if normalize_org(org) != normalize_org(holder) {
                record.registry_holder = Some(holder.to_string());
            }
        }
        (Some(org), None) => record.organization_raw = Some(org.to_string()),
        (None, Some(holder)) => record.organization_raw = Some(holder.to_string()),
        (None, None) => {}
    }

    fill_location(&mut record, country_code, country_name, locale);
    record.organization_localized = record
        .organization_raw
        .as_deref()
        .map(|org| locale.organization(org));

    let mut signals = AnonymitySignals::default();
    for result in results {
        signals.absorb(&result.signals);
    }
    record.anonymity = classify_anonymity(&signals, record.organization_raw.as_deref());
    record.risk = merge_risk(results);

    for result in results {
        if let Some(payload) = &result.payload {
            record
                .provider_payloads
                .insert(result.provider.clone(), payload.clone());
        }
    }

    record
}

/// Record served from the prefix cache, combined with whatever the local
/// providers reported for this target.
pub fn from_cache(
    target: &Target,
    entry: &CacheEntry,
    local_results: &[ProviderResult],
    locale: Locale,
) -> CanonicalRecord {
    let cached = ProviderResult::new("cache")
        .with_organization(Some(entry.organization.clone()))
        .with_country(Some(entry.country_code.clone()), entry.country_name.clone());

    let mut results = Vec::with_capacity(local_results.len() + 1);
    results.push(cached);
    results.extend_from_slice(local_results);

    let mut record = merge(target, &results, locale);
    record.status = LookupStatus::Success(SuccessSource::Cache);
    record
}

fn first<'a, F>(results: &'a [ProviderResult], field: F) -> Option<&'a str>
where
    F: Fn(&'a ProviderResult) -> Option<&'a str>,
{
    results
        .iter()
        .filter_map(field)
        .find(|v| !v.trim().is_empty())
}

fn fill_location(
    record: &mut CanonicalRecord,
    code: Option<&str>,
    provider_name: Option<&str>,
    locale: Locale,
) {
    let Some(code) = code else {
        record.country_name = provider_name.map(str::to_string);
        return;
    };

    record.country_code = Some(code.to_string());
    record.country_name = Some(
        locale
            .country(code)
            .or(provider_name)
            .unwrap_or(code)
            .to_string(),
    );
    record.regional_registry = regional_registry(code);
}

fn merge_risk(results: &[ProviderResult]) -> RiskAssessment {
    let mut checked = false;
    let mut signals = BTreeSet::new();

    for facts in results.iter().filter_map(|r| r.risk.as_ref()) {
        checked = true;
        signals.extend(facts.open_ports.iter().map(|p| format!("port/{}", p)));
        signals.extend(facts.vulnerabilities.iter().cloned());
    }

    if checked {
        RiskAssessment::Checked(signals)
    } else {
        RiskAssessment::NotChecked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::PrefixCache;
    use crate::locale::Rir;
    use crate::providers::RiskFacts;

    fn geo(org: &str, cc: &str, name: &str) -> ProviderResult {
        ProviderResult::new("ip-api")
            .with_organization(Some(org.to_string()))
            .with_country(Some(cc.to_string()), Some(name.to_string()))
    }

    #[test]
    fn test_keyword_table_order() {
        assert_eq!(classify_by_keywords("iCloud Private Relay"), AnonymityClass::PrivacyRelay);
        assert_eq!(classify_by_keywords("Mullvad VPN AB"), AnonymityClass::VpnProxy);
        assert_eq!(classify_by_keywords("Cloudflare, Inc."), AnonymityClass::VpnProxy);
        assert_eq!(classify_by_keywords("DigitalOcean, LLC"), AnonymityClass::Hosting);
        assert_eq!(classify_by_keywords("Comcast Cable"), AnonymityClass::Standard);
    }

    #[test]
    fn test_explicit_flags_win() {
        let signals = AnonymitySignals {
            tor: Some(true),
            hosting: Some(true),
            ..Default::default()
        };
        assert_eq!(
            classify_anonymity(&signals, Some("Comcast Cable")),
            AnonymityClass::TorExit
        );

        let signals = AnonymitySignals {
            hosting: Some(true),
            ..Default::default()
        };
        assert_eq!(
            classify_anonymity(&signals, Some("Mullvad VPN")),
            AnonymityClass::Hosting
        );

        let signals = AnonymitySignals {
            tor: Some(false),
            ..Default::default()
        };
        assert_eq!(
            classify_anonymity(&signals, Some("Mullvad VPN")),
            AnonymityClass::VpnProxy
        );
    }

    #[test]
    fn test_merge_priority_and_location() {
        let target = Target::parse("203.0.113.9");
        let results = vec![
            ProviderResult::new("ipinfo").with_country(Some("JP".to_string()), None),
            geo("NTT Communications Corporation", "JP", "Japan"),
        ];

        let record = merge(&target, &results, Locale::Japanese);
        assert_eq!(
            record.organization_raw.as_deref(),
            Some("NTT Communications Corporation")
        );
        assert_eq!(record.organization_localized.as_deref(), Some("NTTドコモビジネス"));
        assert_eq!(record.country_code.as_deref(), Some("JP"));
        assert_eq!(record.country_name.as_deref(), Some("日本"));
        assert_eq!(record.regional_registry, Some(Rir::Jpnic));
        assert_eq!(record.status.to_string(), "Success (IPv4 API)");
    }

    #[test]
    fn test_country_name_falls_back_to_code() {
        let target = Target::parse("203.0.113.9");
        let results = vec![ProviderResult::new("x").with_country(Some("ZZ".to_string()), None)];
        let record = merge(&target, &results, Locale::Raw);
        assert_eq!(record.country_name.as_deref(), Some("ZZ"));
        assert_eq!(record.regional_registry, None);
    }

    #[test]
    fn test_registry_holder_kept_only_when_different() {
        let target = Target::parse("192.0.2.1");

        let same = vec![
            geo("Example Net, Inc.", "US", "United States"),
            ProviderResult::new("rdap").with_registry_holder(Some("EXAMPLE NET INC".to_string())),
        ];
        assert!(merge(&target, &same, Locale::Raw).registry_holder.is_none());

        let different = vec![
            geo("Example Net, Inc.", "US", "United States"),
            ProviderResult::new("rdap").with_registry_holder(Some("Parent Holdings LLC".to_string())),
        ];
        assert_eq!(
            merge(&target, &different, Locale::Raw).registry_holder.as_deref(),
            Some("Parent Holdings LLC")
        );

        let holder_only = vec![
            ProviderResult::new("rdap").with_registry_holder(Some("Parent Holdings LLC".to_string())),
        ];
        let record = merge(&target, &holder_only, Locale::Raw);
        assert_eq!(record.organization_raw.as_deref(), Some("Parent Holdings LLC"));
        assert!(record.registry_holder.is_none());
    }

    #[test]
    fn test_risk_not_checked_vs_checked_empty() {
        let target = Target::parse("192.0.2.1");
        let plain = vec![geo("Example", "US", "United States")];
        assert_eq!(merge(&target, &plain, Locale::Raw).risk, RiskAssessment::NotChecked);

        let checked = vec![
            geo("Example", "US", "United States"),
            ProviderResult::new("internetdb").with_risk(RiskFacts::default()),
        ];
        assert_eq!(
            merge(&target, &checked, Locale::Raw).risk,
            RiskAssessment::Checked(BTreeSet::new())
        );
    }

    #[test]
    fn test_risk_signals_union() {
        let target = Target::parse("192.0.2.1");
        let results = vec![
            geo("Example", "US", "United States"),
            ProviderResult::new("internetdb").with_risk(RiskFacts {
                open_ports: vec![22, 3389],
                vulnerabilities: vec!["CVE-2019-0708".to_string()],
            }),
        ];
        let RiskAssessment::Checked(signals) = merge(&target, &results, Locale::Raw).risk else {
            panic!("risk should be checked");
        };
        let signals: Vec<&str> = signals.iter().map(String::as_str).collect();
        assert_eq!(signals, vec!["CVE-2019-0708", "port/22", "port/3389"]);
    }

    #[test]
    fn test_payloads_keyed_by_provider() {
        let target = Target::parse("2001:db8::1");
        let results = vec![geo("Example", "US", "United States")
            .with_payload(serde_json::json!({"status": "success"}))];
        let record = merge(&target, &results, Locale::Raw);
        assert!(record.provider_payloads.contains_key("ip-api"));
        assert_eq!(record.status.to_string(), "Success (IPv6 API)");
    }

    #[test]
    fn test_from_cache() {
        let mut cache = PrefixCache::default();
        let target = Target::parse("198.51.100.20");
        let key = cache.derive_key(&target).unwrap();
        cache.put(key, "Hetzner Online GmbH", "DE", Some("Germany"));

        let record = from_cache(&target, cache.get(&key).unwrap(), &[], Locale::Raw);
        assert_eq!(record.status.to_string(), "Success (Cache)");
        assert_eq!(record.organization_raw.as_deref(), Some("Hetzner Online GmbH"));
        assert_eq!(record.country_name.as_deref(), Some("Germany"));
        assert_eq!(record.anonymity, AnonymityClass::Hosting);
        assert_eq!(record.risk, RiskAssessment::NotChecked);
    }

    #[test]
    fn test_from_cache_with_local_tor_flag() {
        let mut cache = PrefixCache::default();
        let target = Target::parse("198.51.100.21");
        let key = cache.derive_key(&target).unwrap();
        cache.put(key, "Hetzner Online GmbH", "DE", Some("Germany"));

        let tor = ProviderResult::new("tor").with_tor(true);
        let record = from_cache(&target, cache.get(&key).unwrap(), &[tor], Locale::Raw);
        assert_eq!(record.status.to_string(), "Success (Cache)");
        assert_eq!(record.anonymity, AnonymityClass::TorExit);
        assert!(record.provider_payloads.is_empty());
    }
}
