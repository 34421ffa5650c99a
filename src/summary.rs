//! Frequency-weighted tallies over finished records.
//!
//! Every count is weighted by how many input lines named the target, so a
//! target pasted five times counts five times.

use crate::record::CanonicalRecord;
use serde::Serialize;
use std::collections::HashMap;

/// How many top entries each tally keeps by default.
pub const DEFAULT_TOP_N: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// Unique targets summarized.
    pub targets: usize,
    /// Input lines behind those targets.
    pub occurrences: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Targets classified as anything other than a standard connection.
    pub anonymous: usize,
    /// Localized organization name → weighted count.
    pub organizations: Vec<Tally>,
    /// Localized country name → weighted count.
    pub countries: Vec<Tally>,
    /// Country code → weighted count, untruncated.
    pub country_codes: Vec<Tally>,
    /// Most frequent targets.
    pub top_targets: Vec<Tally>,
}

/// Summarize finished records, keeping the `top_n` largest entries per tally.
pub fn summarize(records: &[CanonicalRecord], top_n: usize) -> Summary {
    let mut summary = Summary {
        targets: records.len(),
        ..Default::default()
    };

    let mut organizations: HashMap<&str, usize> = HashMap::new();
    let mut countries: HashMap<&str, usize> = HashMap::new();
    let mut country_codes: HashMap<&str, usize> = HashMap::new();
    let mut targets: HashMap<&str, usize> = HashMap::new();

    for record in records {
        let weight = record.target.occurrence_count();
        summary.occurrences += weight;

        if !record.status.is_success() {
            summary.failed += 1;
            continue;
        }
        summary.succeeded += 1;

        if record.anonymity.is_anonymous() {
            summary.anonymous += 1;
        }

        let org = record
            .organization_localized
            .as_deref()
            .or(record.organization_raw.as_deref());
        if let Some(org) = org {
            *organizations.entry(org).or_insert(0) += weight;
        }
        if let Some(country) = record.country_name.as_deref() {
            *countries.entry(country).or_insert(0) += weight;
        }
        if let Some(cc) = record.country_code.as_deref() {
            *country_codes.entry(cc).or_insert(0) += weight;
        }
        *targets.entry(record.target.normalized()).or_insert(0) += weight;
    }

    summary.organizations = ranked(organizations, top_n);
    summary.countries = ranked(countries, top_n);
    summary.country_codes = ranked(country_codes, usize::MAX);
    summary.top_targets = ranked(targets, top_n);
    summary
}

/// Count descending, then name ascending.
fn ranked(counts: HashMap<&str, usize>, top_n: usize) -> Vec<Tally> {
    let mut tallies: Vec<Tally> = counts
        .into_iter()
        .map(|(name, count)| Tally {
            name: name.to_string(),
            count,
        })
        .collect();
    tallies.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    tallies.truncate(top_n);
    tallies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, LookupFailure};
    use crate::record::{AnonymityClass, LookupStatus, SuccessSource};
    use crate::target::classify;

    fn records() -> Vec<CanonicalRecord> {
        let classified = classify([
            "192.0.2.1",
            "192.0.2.1",
            "192.0.2.1",
            "198.51.100.1",
            "203.0.113.1",
            "example.com",
        ]);

        classified
            .targets
            .into_iter()
            .map(|target| match target.normalized() {
                "192.0.2.1" => {
                    let mut r = CanonicalRecord::new(
                        target,
                        LookupStatus::Success(SuccessSource::Ipv4Api),
                    );
                    r.organization_raw = Some("Example Net".to_string());
                    r.country_code = Some("US".to_string());
                    r.country_name = Some("United States".to_string());
                    r
                }
                "198.51.100.1" => {
                    let mut r = CanonicalRecord::new(
                        target,
                        LookupStatus::Success(SuccessSource::Cache),
                    );
                    r.organization_raw = Some("Hetzner Online GmbH".to_string());
                    r.country_code = Some("DE".to_string());
                    r.country_name = Some("Germany".to_string());
                    r.anonymity = AnonymityClass::Hosting;
                    r
                }
                "203.0.113.1" => CanonicalRecord::failed(
                    target,
                    LookupFailure::new(FailureKind::Network, "Request timed out"),
                ),
                _ => CanonicalRecord::hostname(target),
            })
            .collect()
    }

    #[test]
    fn test_weighted_counts() {
        let summary = summarize(&records(), DEFAULT_TOP_N);

        assert_eq!(summary.targets, 4);
        assert_eq!(summary.occurrences, 6);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.anonymous, 1);
        assert_eq!(
            summary.organizations[0],
            Tally {
                name: "Example Net".to_string(),
                count: 3
            }
        );
        assert_eq!(summary.countries.len(), 2);
        assert_eq!(summary.country_codes[0].name, "US");
        assert_eq!(summary.top_targets[0].name, "192.0.2.1");
        assert_eq!(summary.top_targets[0].count, 3);
    }

    #[test]
    fn test_top_n_truncates() {
        let summary = summarize(&records(), 1);
        assert_eq!(summary.organizations.len(), 1);
        assert_eq!(summary.top_targets.len(), 1);
        assert_eq!(summary.country_codes.len(), 2);
    }

    #[test]
    fn test_empty() {
        assert_eq!(summarize(&[], DEFAULT_TOP_N), Summary::default());
    }
}
