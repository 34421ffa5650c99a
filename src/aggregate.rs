//! IPv4 range aggregation.
//!
//! Successful IPv4 records sharing organization and country collapse into a
//! single `[min, max]` range. Aggregation accepts its own output, so running
//! it again over already-aggregated entries changes nothing.

use crate::record::{CanonicalRecord, LookupStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};

/// A run of IPv4 targets with the same organization and country.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRange {
    pub first_address: Ipv4Addr,
    pub last_address: Ipv4Addr,
    pub member_count: usize,
    pub organization: String,
    pub organization_localized: Option<String>,
    pub country_code: String,
    pub country_name: Option<String>,
    /// Original status for a single member, `Aggregated(n)` otherwise.
    pub status: LookupStatus,
}

impl AggregatedRange {
    fn from_record(record: &CanonicalRecord) -> Option<Self> {
        if !record.status.is_success() {
            return None;
        }
        let IpAddr::V4(addr) = record.target.addr()? else {
            return None;
        };

        Some(Self {
            first_address: addr,
            last_address: addr,
            member_count: 1,
            organization: record.organization_raw.clone()?,
            organization_localized: record.organization_localized.clone(),
            country_code: record.country_code.clone()?,
            country_name: record.country_name.clone(),
            status: record.status.clone(),
        })
    }

    fn key(&self) -> (String, String) {
        (self.organization.clone(), self.country_code.clone())
    }

    fn absorb(&mut self, other: AggregatedRange) {
        if u32::from(other.first_address) < u32::from(self.first_address) {
            self.first_address = other.first_address;
        }
        if u32::from(other.last_address) > u32::from(self.last_address) {
            self.last_address = other.last_address;
        }
        self.member_count += other.member_count;
        self.status = LookupStatus::Aggregated(self.member_count);
    }
}

impl fmt::Display for AggregatedRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.member_count == 1 {
            write!(f, "{}", self.first_address)
        } else {
            write!(
                f,
                "{} - {} (x{} IPs)",
                self.first_address, self.last_address, self.member_count
            )
        }
    }
}

/// Output row of the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregateEntry {
    Range(AggregatedRange),
    /// Record that is not eligible for aggregation, passed through as is.
    Record(CanonicalRecord),
}

/// Aggregate finished records.
pub fn aggregate(records: &[CanonicalRecord]) -> Vec<AggregateEntry> {
    reaggregate(records.iter().cloned().map(AggregateEntry::Record))
}

/// Aggregate a mix of records and previously built ranges.
///
/// Groups are emitted in first-seen order, followed by ineligible records
/// in input order.
pub fn reaggregate<I>(entries: I) -> Vec<AggregateEntry>
where
    I: IntoIterator<Item = AggregateEntry>,
{
    let mut ranges: Vec<AggregatedRange> = Vec::new();
    let mut index: HashMap<(String, String), usize> = HashMap::new();
    let mut passthrough: Vec<CanonicalRecord> = Vec::new();

    for entry in entries {
        let range = match entry {
            AggregateEntry::Range(range) => range,
            AggregateEntry::Record(record) => match AggregatedRange::from_record(&record) {
                Some(range) => range,
                None => {
                    passthrough.push(record);
                    continue;
                }
            },
        };

        match index.get(&range.key()) {
            Some(&i) => ranges[i].absorb(range),
            None => {
                index.insert(range.key(), ranges.len());
                ranges.push(range);
            }
        }
    }

    ranges
        .into_iter()
        .map(AggregateEntry::Range)
        .chain(passthrough.into_iter().map(AggregateEntry::Record))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FailureKind, LookupFailure};
    use crate::record::SuccessSource;
    use crate::target::Target;

    fn record(ip: &str, org: &str, cc: &str) -> CanonicalRecord {
        let mut record = CanonicalRecord::new(
            Target::parse(ip),
            LookupStatus::Success(SuccessSource::Ipv4Api),
        );
        record.organization_raw = Some(org.to_string());
        record.country_code = Some(cc.to_string());
        record
    }

    fn ranges(entries: &[AggregateEntry]) -> Vec<&AggregatedRange> {
        entries
            .iter()
            .filter_map(|e| match e {
                AggregateEntry::Range(r) => Some(r),
                AggregateEntry::Record(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_numeric_ordering() {
        let records = vec![
            record("10.0.0.5", "Example", "US"),
            record("10.0.0.1", "Example", "US"),
            record("10.0.0.9", "Example", "US"),
        ];

        let out = aggregate(&records);
        assert_eq!(out.len(), 1);
        let range = ranges(&out)[0];
        assert_eq!(range.to_string(), "10.0.0.1 - 10.0.0.9 (x3 IPs)");
        assert_eq!(range.status, LookupStatus::Aggregated(3));
    }

    #[test]
    fn test_numeric_not_lexicographic() {
        let records = vec![
            record("10.0.0.10", "Example", "US"),
            record("10.0.0.9", "Example", "US"),
        ];
        let out = aggregate(&records);
        let range = ranges(&out)[0];
        assert_eq!(range.first_address, Ipv4Addr::new(10, 0, 0, 9));
        assert_eq!(range.last_address, Ipv4Addr::new(10, 0, 0, 10));
    }

    #[test]
    fn test_single_member_keeps_status() {
        let out = aggregate(&[record("192.0.2.1", "Solo", "JP")]);
        let range = ranges(&out)[0];
        assert_eq!(range.member_count, 1);
        assert_eq!(range.status, LookupStatus::Success(SuccessSource::Ipv4Api));
        assert_eq!(range.to_string(), "192.0.2.1");
    }

    #[test]
    fn test_groups_and_passthrough_order() {
        let failed = CanonicalRecord::failed(
            Target::parse("198.51.100.1"),
            LookupFailure::new(FailureKind::Declined, "reserved range"),
        );
        let records = vec![
            record("203.0.113.1", "B-Net", "DE"),
            CanonicalRecord::hostname(Target::parse("example.com")),
            record("192.0.2.1", "A-Net", "US"),
            failed,
            record("2001:db8::1", "A-Net", "US"),
            record("203.0.113.2", "B-Net", "DE"),
            record("203.0.113.3", "B-Net", "FR"),
        ];

        let out = aggregate(&records);
        let orgs: Vec<(&str, &str, usize)> = ranges(&out)
            .iter()
            .map(|r| (r.organization.as_str(), r.country_code.as_str(), r.member_count))
            .collect();
        assert_eq!(
            orgs,
            vec![("B-Net", "DE", 2), ("A-Net", "US", 1), ("B-Net", "FR", 1)]
        );

        let passthrough: Vec<&str> = out
            .iter()
            .filter_map(|e| match e {
                AggregateEntry::Record(r) => Some(r.target.normalized()),
                AggregateEntry::Range(_) => None,
            })
            .collect();
        assert_eq!(passthrough, vec!["example.com", "198.51.100.1", "2001:db8::1"]);
    }

    #[test]
    fn test_missing_country_not_eligible() {
        let mut rec = record("192.0.2.1", "Example", "US");
        rec.country_code = None;
        let out = aggregate(&[rec]);
        assert!(matches!(out[0], AggregateEntry::Record(_)));
    }

    #[test]
    fn test_reaggregate_is_idempotent() {
        let records = vec![
            record("10.0.0.5", "Example", "US"),
            record("10.0.0.1", "Example", "US"),
            record("192.0.2.7", "Other", "JP"),
            CanonicalRecord::hostname(Target::parse("example.org")),
        ];

        let once = aggregate(&records);
        let twice = reaggregate(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_reaggregate_merges_new_records_into_ranges() {
        let once = aggregate(&[
            record("10.0.0.5", "Example", "US"),
            record("10.0.0.7", "Example", "US"),
        ]);
        let mut more = once;
        more.push(AggregateEntry::Record(record("10.0.0.2", "Example", "US")));

        let out = reaggregate(more);
        let range = ranges(&out)[0];
        assert_eq!(range.to_string(), "10.0.0.2 - 10.0.0.7 (x3 IPs)");
    }

    #[test]
    fn test_entry_serialization_is_tagged() {
        let out = aggregate(&[record("192.0.2.1", "Solo", "JP")]);
        let json = serde_json::to_value(&out[0]).unwrap();
        assert_eq!(json["type"], "range");
        assert_eq!(json["first_address"], "192.0.2.1");
    }
}
