//! Prefix-scoped TTL cache for organization/country lookups.
//!
//! Addresses are coarsened to their network (IPv4 /24 and IPv6 /48 by
//! default) so one provider answer serves every target in the same block.
//! Different addresses in one /24 usually, but not always, belong to the
//! same operator; the cache accepts that imprecision in exchange for far
//! fewer external calls.

use crate::target::Target;
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(86_400);
pub const DEFAULT_NETMASK_V4: u8 = 24;
pub const DEFAULT_NETMASK_V6: u8 = 48;
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Network prefix a target is cached under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey(IpNet);

impl CacheKey {
    pub fn network(&self) -> IpNet {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Cached organization/country for one prefix.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub organization: String,
    pub country_code: String,
    /// Country name as the provider spelled it.
    pub country_name: Option<String>,
    /// When this entry was written.
    pub inserted_at: Instant,
}

impl CacheEntry {
    /// Check if this entry is stale at `now`.
    pub fn is_expired_at(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.inserted_at) >= ttl
    }
}

/// TTL cache keyed by network prefix.
///
/// Owned by a single coordinator; callers serialize access through `&mut`.
#[derive(Debug)]
pub struct PrefixCache {
    entries: HashMap<CacheKey, CacheEntry>,
    ttl: Duration,
    netmask_v4: u8,
    netmask_v6: u8,
    max_entries: usize,
}

impl Default for PrefixCache {
    fn default() -> Self {
        Self::new(
            DEFAULT_CACHE_TTL,
            DEFAULT_NETMASK_V4,
            DEFAULT_NETMASK_V6,
            DEFAULT_MAX_ENTRIES,
        )
    }
}

impl PrefixCache {
    /// Create a new prefix cache. Netmasks are clamped to the address width.
    pub fn new(ttl: Duration, netmask_v4: u8, netmask_v6: u8, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            netmask_v4: netmask_v4.min(32),
            netmask_v6: netmask_v6.min(128),
            max_entries: max_entries.max(1),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Prefix for a target. Hostnames are never cached.
    pub fn derive_key(&self, target: &Target) -> Option<CacheKey> {
        self.key_for_addr(target.addr()?)
    }

    /// Prefix for a bare address.
    pub fn key_for_addr(&self, addr: IpAddr) -> Option<CacheKey> {
        let net = match addr {
            IpAddr::V4(v4) => IpNet::V4(Ipv4Net::new(v4, self.netmask_v4).ok()?.trunc()),
            IpAddr::V6(v6) => IpNet::V6(Ipv6Net::new(v6, self.netmask_v6).ok()?.trunc()),
        };
        Some(CacheKey(net))
    }

    /// Get a fresh entry, if any.
    pub fn get(&self, key: &CacheKey) -> Option<&CacheEntry> {
        self.get_at(key, Instant::now())
    }

    /// Get an entry that is still fresh at `now`.
    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<&CacheEntry> {
        let entry = self.entries.get(key)?;
        if entry.is_expired_at(now, self.ttl) {
            // Stale entries are ignored, not removed; overwrite or purge handles them
            None
        } else {
            Some(entry)
        }
    }

    /// Upsert an entry with a fresh timestamp.
    pub fn put(
        &mut self,
        key: CacheKey,
        organization: &str,
        country_code: &str,
        country_name: Option<&str>,
    ) {
        self.put_at(key, organization, country_code, country_name, Instant::now());
    }

    /// Upsert an entry stamped with `inserted_at`.
    pub fn put_at(
        &mut self,
        key: CacheKey,
        organization: &str,
        country_code: &str,
        country_name: Option<&str>,
        inserted_at: Instant,
    ) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            self.purge_expired_at(inserted_at);

            if self.entries.len() >= self.max_entries {
                if let Some(oldest) = self
                    .entries
                    .values()
                    .min_by_key(|e| e.inserted_at)
                    .map(|e| e.key)
                {
                    self.entries.remove(&oldest);
                }
            }
        }

        self.entries.insert(
            key,
            CacheEntry {
                key,
                organization: organization.to_string(),
                country_code: country_code.to_string(),
                country_name: country_name.map(str::to_string),
                inserted_at,
            },
        );
    }

    /// Remove expired entries.
    pub fn purge_expired(&mut self) {
        self.purge_expired_at(Instant::now());
    }

    fn purge_expired_at(&mut self, now: Instant) {
        let ttl = self.ttl;
        self.entries.retain(|_, e| !e.is_expired_at(now, ttl));
    }

    /// Number of stored entries, stale ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
