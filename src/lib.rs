//! Rate-aware batch IP and hostname enrichment.
//!
//! Takes noisy lists of IP addresses and hostnames, repairs common OCR
//! misreads, and resolves each address to its organization, country and
//! anonymity class using free and keyed geo/registry providers. Lookups
//! are throttled per upstream limits and deduplicated by network prefix.
//!
//! # Features
//!
//! - **Target classification** - OCR repair, IPv4/IPv6/hostname detection, frequency counting
//! - **Prefix cache** - One upstream call per /24 (IPv4) or /48 (IPv6) within the TTL
//! - **Rate-aware scheduling** - Worker limit, inter-request delay, 429 deferral, cancellation
//! - **Enrichment** - RDAP registry holder, Tor exit list, AbuseIPDB flags, InternetDB risk
//! - **Anonymity classification** - Provider flags first, organization keywords second
//! - **Range aggregation** - Collapse IPv4 records by organization and country
//! - **Localization** - Raw provider names or Japanese country/ISP names
//!
//! # Example Configuration
//!
//! ```yaml
//! batch:
//!   mode: stable
//!   cache_ttl_seconds: 86400
//!
//! locale: ja
//!
//! ip_api:
//!   enabled: true
//!
//! ipinfo:
//!   enabled: true
//!   token: "${IPINFO_TOKEN}"
//!
//! tor:
//!   enabled: true
//! ```

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod locale;
pub mod merge;
pub mod providers;
pub mod record;
pub mod scheduler;
pub mod summary;
pub mod target;

pub use aggregate::{aggregate, reaggregate, AggregateEntry, AggregatedRange};
pub use config::Config;
pub use engine::Engine;
pub use error::{EngineError, FailureKind, LookupFailure};
pub use record::{AnonymityClass, CanonicalRecord, LookupStatus};
pub use scheduler::{BatchContext, BatchOptions, BatchReport, CancelFlag, ProgressSnapshot};
pub use summary::{summarize, Summary};
pub use target::{classify, Classified, Target};
