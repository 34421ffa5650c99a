//! Target classification.
//!
//! Turns raw input lines (often pasted from screenshots or OCR output) into
//! typed, deduplicated targets. Common OCR misreads are repaired only when
//! the repair produces a valid IP address, so legitimate hostnames are never
//! rewritten.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use tracing::debug;

/// Substitutions applied to every candidate.
const OCR_SUBSTITUTIONS: &[(char, &str)] = &[
    ('Ⅱ', "11"),
    ('I', "1"),
    ('l', "1"),
    ('|', "1"),
    ('O', "0"),
    ('o', "0"),
    ('S', "5"),
    ('s', "5"),
];

/// Substitutions only applied when the candidate has no `:`. `a`/`b` are
/// valid IPv6 hex digits.
const OCR_IPV4_SUBSTITUTIONS: &[(char, &str)] = &[('A', "4"), ('a', "4"), ('B', "8")];

/// Letters that can never appear in an IP literal.
const NON_ADDRESS_LETTERS: &str = "ghijklmnopqrstuvwxyz";

/// What kind of target a string is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Ipv4,
    Ipv6,
    Hostname,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Ipv4 => write!(f, "IPv4"),
            TargetKind::Ipv6 => write!(f, "IPv6"),
            TargetKind::Hostname => write!(f, "Hostname"),
        }
    }
}

/// A classified lookup target. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    raw: String,
    normalized: String,
    kind: TargetKind,
    #[serde(skip)]
    addr: Option<IpAddr>,
    occurrence_count: usize,
}

impl Target {
    /// Classify a single string without OCR repair.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        Self::from_parts(raw, trimmed.to_string(), 1)
    }

    fn from_parts(raw: &str, normalized: String, occurrence_count: usize) -> Self {
        let addr = normalized.parse::<IpAddr>().ok();
        let kind = match addr {
            Some(IpAddr::V4(_)) => TargetKind::Ipv4,
            Some(IpAddr::V6(_)) => TargetKind::Ipv6,
            None => TargetKind::Hostname,
        };

        Self {
            raw: raw.to_string(),
            normalized,
            kind,
            addr,
            occurrence_count,
        }
    }

    /// The input line as first seen.
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Trimmed and OCR-corrected value used as the identity of the target.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }

    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    /// Parsed address for IP targets.
    pub fn addr(&self) -> Option<IpAddr> {
        self.addr
    }

    /// How many input lines normalized to this target.
    pub fn occurrence_count(&self) -> usize {
        self.occurrence_count
    }

    pub fn is_ip(&self) -> bool {
        self.addr.is_some()
    }

    /// Whether a hostname target actually looks like a hostname rather than a
    /// mangled address.
    pub fn looks_like_hostname(&self) -> bool {
        is_likely_hostname(&self.normalized)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

/// Output of [`classify`].
#[derive(Debug, Clone, Default)]
pub struct Classified {
    /// Unique targets in first-seen order.
    pub targets: Vec<Target>,
    /// Occurrences per normalized value.
    pub frequency: HashMap<String, usize>,
}

impl Classified {
    pub fn ip_count(&self) -> usize {
        self.targets.iter().filter(|t| t.is_ip()).count()
    }

    pub fn hostname_count(&self) -> usize {
        self.targets.len() - self.ip_count()
    }
}

/// Classify raw input lines into unique targets.
pub fn classify<I, S>(raw_lines: I) -> Classified
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut targets: Vec<Target> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut frequency: HashMap<String, usize> = HashMap::new();

    for line in raw_lines {
        let raw = line.as_ref();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        let normalized = normalize(trimmed);
        *frequency.entry(normalized.clone()).or_insert(0) += 1;

        match index.get(&normalized) {
            Some(&i) => targets[i].occurrence_count += 1,
            None => {
                let target = Target::from_parts(raw, normalized.clone(), 1);
                if target.kind == TargetKind::Hostname && !target.looks_like_hostname() {
                    debug!(token = %target.normalized, "Token is neither an IP nor a likely hostname");
                }
                index.insert(normalized, targets.len());
                targets.push(target);
            }
        }
    }

    Classified { targets, frequency }
}

/// Trimmed value, OCR-corrected when that yields a valid IP.
fn normalize(trimmed: &str) -> String {
    if trimmed.parse::<IpAddr>().is_ok() {
        return trimmed.to_string();
    }

    let corrected = correct_ocr(trimmed);
    if corrected != trimmed && corrected.parse::<IpAddr>().is_ok() {
        debug!(from = trimmed, to = %corrected, "Repaired OCR misread");
        corrected
    } else {
        trimmed.to_string()
    }
}

/// Apply the OCR substitution table.
fn correct_ocr(s: &str) -> String {
    let mut out = s.to_string();
    for (from, to) in OCR_SUBSTITUTIONS {
        out = out.replace(*from, to);
    }
    if !out.contains(':') {
        for (from, to) in OCR_IPV4_SUBSTITUTIONS {
            out = out.replace(*from, to);
        }
    }
    out
}

/// A token is a likely hostname if it has a hyphen or a letter outside the
/// hex alphabet.
pub fn is_likely_hostname(s: &str) -> bool {
    s.contains('-')
        || s
            .chars()
            .any(|c| NON_ADDRESS_LETTERS.contains(c.to_ascii_lowercase()))
}
