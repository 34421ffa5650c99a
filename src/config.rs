//! Configuration types for the enrichment engine.

use crate::locale::Locale;
use crate::scheduler::BatchOptions;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Scheduling and enrichment settings.
    #[serde(default)]
    pub batch: BatchSettings,

    /// Output language for country and organization names.
    #[serde(default)]
    pub locale: Locale,

    /// Primary geo provider (ip-api.com).
    #[serde(default)]
    pub ip_api: IpApiConfig,

    /// Premium geo provider (ipinfo.io), tried before the primary.
    #[serde(default)]
    pub ipinfo: Option<IpInfoConfig>,

    /// Registry lookup of the block holder. Off unless configured, since it
    /// adds a request per enriched target.
    #[serde(default)]
    pub rdap: Option<RdapConfig>,

    /// Tor exit node detection.
    #[serde(default)]
    pub tor: Option<TorConfig>,

    /// AbuseIPDB anonymity flags.
    #[serde(default)]
    pub abuseipdb: Option<AbuseIPDBConfig>,

    /// Shodan InternetDB risk signals.
    #[serde(default)]
    pub internetdb: InternetDbConfig,
}

/// Throughput preset.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// One worker, 2.5 s between requests.
    #[default]
    Stable,
    /// Two workers, 1.4 s between requests.
    Fast,
}

impl Mode {
    pub fn max_workers(&self) -> usize {
        match self {
            Mode::Stable => 1,
            Mode::Fast => 2,
        }
    }

    pub fn inter_request_delay(&self) -> Duration {
        match self {
            Mode::Stable => Duration::from_millis(2500),
            Mode::Fast => Duration::from_millis(1400),
        }
    }
}

/// Batch settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatchSettings {
    #[serde(default)]
    pub mode: Mode,

    /// Overrides the mode's worker count.
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Overrides the mode's delay.
    #[serde(default)]
    pub inter_request_delay_ms: Option<u64>,

    /// Minimum pause after a rate-limit response (seconds).
    #[serde(default = "default_rate_limit_wait")]
    pub rate_limit_wait_seconds: u64,

    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_seconds: u64,

    #[serde(default = "default_netmask_v4")]
    pub cache_netmask_v4: u8,

    #[serde(default = "default_netmask_v6")]
    pub cache_netmask_v6: u8,

    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,

    /// Hard limit on a single provider call, on top of the HTTP timeout.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub enable_registry_lookup: bool,

    #[serde(default = "default_true")]
    pub enable_risk_check: bool,

    #[serde(default = "default_true")]
    pub enable_anonymity_check: bool,

    /// Enrich every target instead of only suspicious ones.
    #[serde(default)]
    pub enrich_all: bool,

    /// Skip all provider calls.
    #[serde(default)]
    pub offline: bool,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            max_workers: None,
            inter_request_delay_ms: None,
            rate_limit_wait_seconds: default_rate_limit_wait(),
            cache_ttl_seconds: default_cache_ttl(),
            cache_netmask_v4: default_netmask_v4(),
            cache_netmask_v6: default_netmask_v6(),
            cache_max_entries: default_cache_max_entries(),
            provider_timeout_ms: default_provider_timeout(),
            enable_registry_lookup: true,
            enable_risk_check: true,
            enable_anonymity_check: true,
            enrich_all: false,
            offline: false,
        }
    }
}

impl BatchSettings {
    pub fn effective_max_workers(&self) -> usize {
        self.max_workers.unwrap_or_else(|| self.mode.max_workers())
    }

    pub fn effective_delay(&self) -> Duration {
        self.inter_request_delay_ms
            .map(Duration::from_millis)
            .unwrap_or_else(|| self.mode.inter_request_delay())
    }
}

fn default_rate_limit_wait() -> u64 {
    120
}

fn default_cache_ttl() -> u64 {
    86_400
}

fn default_netmask_v4() -> u8 {
    24
}

fn default_netmask_v6() -> u8 {
    48
}

fn default_cache_max_entries() -> usize {
    10_000
}

fn default_provider_timeout() -> u64 {
    10_000
}

/// ip-api.com configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_ip_api_url")]
    pub base_url: String,

    /// API request timeout in milliseconds.
    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl Default for IpApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_ip_api_url(),
            timeout_ms: default_timeout(),
        }
    }
}

fn default_ip_api_url() -> String {
    "http://ip-api.com/json".to_string()
}

/// ipinfo.io configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpInfoConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// API token (supports ${ENV_VAR} syntax).
    pub token: String,

    #[serde(default = "default_ipinfo_url")]
    pub base_url: String,

    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_ipinfo_url() -> String {
    "https://ipinfo.io".to_string()
}

/// RDAP configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RdapConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_rdap_url")]
    pub base_url: String,

    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_rdap_url() -> String {
    "https://rdap.org".to_string()
}

/// AbuseIPDB configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AbuseIPDBConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// API key (supports ${ENV_VAR} syntax).
    pub api_key: String,

    #[serde(default = "default_abuseipdb_url")]
    pub base_url: String,

    /// Only consider reports from the last N days.
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,

    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

fn default_abuseipdb_url() -> String {
    "https://api.abuseipdb.com/api/v2".to_string()
}

fn default_max_age_days() -> u32 {
    90
}

/// Shodan InternetDB configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InternetDbConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_internetdb_url")]
    pub base_url: String,

    #[serde(default = "default_timeout")]
    pub timeout_ms: u64,
}

impl Default for InternetDbConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_internetdb_url(),
            timeout_ms: default_timeout(),
        }
    }
}

fn default_internetdb_url() -> String {
    "https://internetdb.shodan.io".to_string()
}

/// Tor exit node detection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// URL of the exit list; bulk list and exit-addresses formats both work.
    #[serde(default = "default_tor_url")]
    pub exit_node_list_url: String,

    /// Read the list from disk instead of downloading it.
    #[serde(default)]
    pub exit_node_list_path: Option<PathBuf>,

    /// How often to refresh the Tor list (seconds).
    #[serde(default = "default_tor_refresh")]
    pub refresh_interval_seconds: u64,
}

fn default_tor_url() -> String {
    "https://check.torproject.org/torbulkexitlist".to_string()
}

fn default_tor_refresh() -> u64 {
    3600
}

fn default_timeout() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        let batch = &self.batch;

        if batch.effective_max_workers() == 0 {
            anyhow::bail!("max_workers must be at least 1");
        }

        if batch.cache_netmask_v4 > 32 {
            anyhow::bail!(
                "cache_netmask_v4 ({}) must be between 0 and 32",
                batch.cache_netmask_v4
            );
        }

        if batch.cache_netmask_v6 > 128 {
            anyhow::bail!(
                "cache_netmask_v6 ({}) must be between 0 and 128",
                batch.cache_netmask_v6
            );
        }

        if batch.provider_timeout_ms == 0 {
            anyhow::bail!("provider_timeout_ms must be greater than 0");
        }

        if let Some(ref ipinfo) = self.ipinfo {
            if ipinfo.enabled && ipinfo.token.is_empty() {
                anyhow::bail!("ipinfo is enabled but token is empty");
            }
        }

        if let Some(ref abuseipdb) = self.abuseipdb {
            if abuseipdb.enabled && abuseipdb.api_key.is_empty() {
                anyhow::bail!("AbuseIPDB is enabled but api_key is empty");
            }
        }

        if let Some(ref tor) = self.tor {
            if let Some(ref path) = tor.exit_node_list_path {
                if tor.enabled && !path.exists() {
                    anyhow::bail!("Tor exit list path does not exist: {}", path.display());
                }
            }
        }

        if !self.ip_api.enabled && !self.ipinfo.as_ref().is_some_and(|i| i.enabled) && !batch.offline {
            anyhow::bail!("No geo provider enabled; enable ip_api or ipinfo, or set batch.offline");
        }

        Ok(())
    }

    /// Scheduler options derived from this configuration.
    pub fn batch_options(&self) -> BatchOptions {
        let batch = &self.batch;
        BatchOptions {
            max_workers: batch.effective_max_workers(),
            inter_request_delay: batch.effective_delay(),
            rate_limit_wait: Duration::from_secs(batch.rate_limit_wait_seconds),
            cache_ttl: Duration::from_secs(batch.cache_ttl_seconds),
            cache_netmask_v4: batch.cache_netmask_v4,
            cache_netmask_v6: batch.cache_netmask_v6,
            cache_max_entries: batch.cache_max_entries,
            enable_registry_lookup: batch.enable_registry_lookup,
            enable_risk_check: batch.enable_risk_check,
            enable_anonymity_check: batch.enable_anonymity_check,
            enrich_all: batch.enrich_all,
            provider_timeout: Duration::from_millis(batch.provider_timeout_ms),
            offline: batch.offline,
            locale: self.locale,
        }
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# netblock-enrich configuration

batch:
  mode: stable                 # stable (1 worker, 2.5s) or fast (2 workers, 1.4s)
  # max_workers: 2             # Override the mode's worker count
  # inter_request_delay_ms: 1000
  rate_limit_wait_seconds: 120 # Minimum pause after HTTP 429
  cache_ttl_seconds: 86400     # Prefix cache lifetime
  cache_netmask_v4: 24
  cache_netmask_v6: 48
  cache_max_entries: 10000
  provider_timeout_ms: 10000
  enable_registry_lookup: true
  enable_risk_check: true
  enable_anonymity_check: true
  enrich_all: false            # Enrich every IP, not only suspicious ones
  offline: false               # Classify only, no provider calls

locale: raw                    # raw or ja

# Primary geo provider (free tier, ~45 requests/minute)
ip_api:
  enabled: true
  base_url: "http://ip-api.com/json"
  timeout_ms: 5000

# Premium geo provider (optional)
ipinfo:
  enabled: true
  token: "${IPINFO_TOKEN}"     # Use environment variable
  timeout_ms: 5000

# Registry lookup of the block holder (optional, one extra request per
# enriched target)
rdap:
  enabled: true
  base_url: "https://rdap.org"

# Tor exit node detection (optional)
tor:
  enabled: true
  exit_node_list_url: "https://check.torproject.org/torbulkexitlist"
  refresh_interval_seconds: 3600

# AbuseIPDB anonymity flags (optional)
abuseipdb:
  enabled: true
  api_key: "${ABUSEIPDB_API_KEY}"
  max_age_days: 90
  timeout_ms: 5000

# Previously observed ports and vulnerabilities
internetdb:
  enabled: true
  base_url: "https://internetdb.shodan.io"
"#
        .to_string()
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    static ENV_VAR: OnceLock<Option<Regex>> = OnceLock::new();
    let Some(re) = ENV_VAR.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").ok()) else {
        return content.to_string();
    };

    re.replace_all(content, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_default()
    })
    .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_batch_settings() {
        let batch = BatchSettings::default();
        assert_eq!(batch.mode, Mode::Stable);
        assert_eq!(batch.effective_max_workers(), 1);
        assert_eq!(batch.effective_delay(), Duration::from_millis(2500));
        assert_eq!(batch.rate_limit_wait_seconds, 120);
        assert_eq!(batch.cache_ttl_seconds, 86_400);
        assert!(!batch.enrich_all);
    }

    #[test]
    fn test_fast_mode_and_overrides() {
        let mut batch = BatchSettings {
            mode: Mode::Fast,
            ..Default::default()
        };
        assert_eq!(batch.effective_max_workers(), 2);
        assert_eq!(batch.effective_delay(), Duration::from_millis(1400));

        batch.max_workers = Some(4);
        batch.inter_request_delay_ms = Some(0);
        assert_eq!(batch.effective_max_workers(), 4);
        assert_eq!(batch.effective_delay(), Duration::ZERO);
    }

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("NETBLOCK_TEST_API_KEY", "secret123");
        let input = "api_key: \"${NETBLOCK_TEST_API_KEY}\"";
        let result = expand_env_vars(input);
        assert_eq!(result, "api_key: \"secret123\"");
        std::env::remove_var("NETBLOCK_TEST_API_KEY");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let input = "token: \"${NETBLOCK_NONEXISTENT_VAR}\"";
        let result = expand_env_vars(input);
        assert_eq!(result, "token: \"\"");
    }

    #[test]
    fn test_parse_config_yaml() {
        let yaml = r#"
batch:
  mode: fast
  rate_limit_wait_seconds: 60
  enrich_all: true

locale: ja

ipinfo:
  token: "abc"
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.batch.mode, Mode::Fast);
        assert_eq!(config.locale, Locale::Japanese);
        assert!(config.ip_api.enabled);
        assert!(config.ipinfo.as_ref().unwrap().enabled);
        assert_eq!(config.ipinfo.as_ref().unwrap().base_url, "https://ipinfo.io");
        assert!(config.tor.is_none());
        assert!(config.rdap.is_none());

        let options = config.batch_options();
        assert_eq!(options.max_workers, 2);
        assert_eq!(options.rate_limit_wait, Duration::from_secs(60));
        assert!(options.enrich_all);
        assert_eq!(options.locale, Locale::Japanese);
    }

    #[test]
    fn test_example_config_parses() {
        let config: Config = serde_yaml::from_str(&Config::example()).unwrap();
        assert!(config.tor.is_some());
        assert!(config.rdap.is_some());
        assert_eq!(config.batch.cache_netmask_v4, 24);
    }

    #[test]
    fn test_registry_lookup_off_by_default() {
        let config = Config::default();
        assert!(config.rdap.is_none());

        let config: Config = serde_yaml::from_str("locale: raw").unwrap();
        assert!(config.rdap.is_none());

        let config: Config = serde_yaml::from_str("rdap:\n  enabled: true").unwrap();
        let rdap = config.rdap.unwrap();
        assert!(rdap.enabled);
        assert_eq!(rdap.base_url, "https://rdap.org");
    }

    #[test]
    fn test_validate_netmask() {
        let mut config = Config::default();
        config.batch.cache_netmask_v4 = 33;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_workers() {
        let mut config = Config::default();
        config.batch.max_workers = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_missing_key() {
        let config = Config {
            abuseipdb: Some(AbuseIPDBConfig {
                enabled: true,
                api_key: String::new(),
                base_url: default_abuseipdb_url(),
                max_age_days: 90,
                timeout_ms: 5000,
            }),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_needs_geo_provider() {
        let mut config = Config::default();
        config.ip_api.enabled = false;
        assert!(config.validate().is_err());

        config.batch.offline = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "batch:\n  max_workers: 3\nlocale: raw").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.batch.effective_max_workers(), 3);
        assert!(config.validate().is_ok());
    }
}
