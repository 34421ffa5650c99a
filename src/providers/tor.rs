//! Tor exit node detection provider.
//!
//! The exit list is downloaded once per refresh interval (or read from a
//! local file) and every lookup after that is a set membership test, so the
//! provider is local and runs for every IP target.

use super::{
    http_client, status_error, target_ip, Provider, ProviderError, ProviderResult, ProviderRole,
};
use crate::config::TorConfig;
use crate::target::Target;
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const LIST_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Tor exit node detection provider.
pub struct TorProvider {
    config: TorConfig,
    client: Client,
    /// `None` until a list has been loaded successfully.
    exit_nodes: RwLock<Option<HashSet<IpAddr>>>,
    last_attempt: RwLock<Option<Instant>>,
}

impl TorProvider {
    /// Create a new Tor provider. The list is not fetched until [`init`](Self::init).
    pub fn new(config: TorConfig) -> Result<Self, ProviderError> {
        let client = http_client(LIST_DOWNLOAD_TIMEOUT)?;

        Ok(Self {
            config,
            client,
            exit_nodes: RwLock::new(None),
            last_attempt: RwLock::new(None),
        })
    }

    /// Initialize the provider by loading the exit node list.
    pub async fn init(&self) -> Result<(), ProviderError> {
        self.refresh().await
    }

    /// Refresh the exit node list if the refresh interval has passed.
    pub async fn refresh_if_needed(&self) -> Result<(), ProviderError> {
        let should_refresh = {
            let last = self.last_attempt.read().ok();
            match last.as_ref().and_then(|l| l.as_ref()) {
                Some(instant) => {
                    instant.elapsed() > Duration::from_secs(self.config.refresh_interval_seconds)
                }
                None => true,
            }
        };

        if should_refresh {
            self.refresh().await?;
        }

        Ok(())
    }

    /// Force refresh the exit node list.
    pub async fn refresh(&self) -> Result<(), ProviderError> {
        let content = match &self.config.exit_node_list_path {
            Some(path) => {
                debug!(path = %path.display(), "Reading Tor exit node list");
                tokio::fs::read_to_string(path).await.map_err(ProviderError::from)
            }
            None => self.download().await,
        };

        // Stamped only once the attempt has finished, so an abandoned
        // download is retried on the next call
        if let Ok(mut last) = self.last_attempt.write() {
            *last = Some(Instant::now());
        }
        let content = content?;

        let count = self.load_list(&content);
        info!(exit_nodes = count, "Tor exit node list loaded");

        Ok(())
    }

    async fn download(&self) -> Result<String, ProviderError> {
        debug!(url = %self.config.exit_node_list_url, "Fetching Tor exit node list");

        let response = self
            .client
            .get(&self.config.exit_node_list_url)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        Ok(response.text().await?)
    }

    /// Replace the exit node set with the addresses in `content`.
    pub fn load_list(&self, content: &str) -> usize {
        let nodes = parse_exit_list(content);
        let count = nodes.len();

        if let Ok(mut guard) = self.exit_nodes.write() {
            *guard = Some(nodes);
        }

        count
    }

    /// `Some(is_exit)` once a list is loaded.
    fn is_tor_exit(&self, ip: &IpAddr) -> Option<bool> {
        self.exit_nodes
            .read()
            .ok()
            .and_then(|nodes| nodes.as_ref().map(|n| n.contains(ip)))
    }

    /// Get the number of loaded exit nodes.
    pub fn exit_node_count(&self) -> usize {
        self.exit_nodes
            .read()
            .ok()
            .and_then(|n| n.as_ref().map(HashSet::len))
            .unwrap_or(0)
    }
}

/// Parse either the bulk exit list (one address per line) or the
/// `exit-addresses` document (`ExitAddress <ip> <date> <time>` lines).
fn parse_exit_list(content: &str) -> HashSet<IpAddr> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| match line.strip_prefix("ExitAddress ") {
            Some(rest) => rest.split_whitespace().next(),
            None if line.contains(' ') => None,
            None => Some(line),
        })
        .filter_map(|token| token.parse().ok())
        .collect()
}

#[async_trait]
impl Provider for TorProvider {
    async fn fetch(&self, target: &Target) -> Result<ProviderResult, ProviderError> {
        let ip = target_ip(target)?;

        match self.is_tor_exit(&ip) {
            Some(true) => {
                debug!(ip = %ip, "IP is a Tor exit node");
                Ok(ProviderResult::new(self.name()).with_tor(true))
            }
            Some(false) => Ok(ProviderResult::new(self.name()).with_tor(false)),
            None => Ok(ProviderResult::new(self.name())),
        }
    }

    fn name(&self) -> &str {
        "tor"
    }

    fn role(&self) -> ProviderRole {
        ProviderRole::Anonymity
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    fn is_local(&self) -> bool {
        true
    }

    async fn prepare(&self) -> Result<(), ProviderError> {
        self.refresh_if_needed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_config() -> TorConfig {
        TorConfig {
            enabled: true,
            exit_node_list_url: "https://check.torproject.org/torbulkexitlist".to_string(),
            exit_node_list_path: None,
            refresh_interval_seconds: 3600,
        }
    }

    fn mark_fresh(provider: &TorProvider) {
        let mut last = provider.last_attempt.write().unwrap();
        *last = Some(Instant::now());
    }

    #[test]
    fn test_provider_metadata() {
        let provider = TorProvider::new(create_test_config()).unwrap();
        assert_eq!(provider.name(), "tor");
        assert_eq!(provider.role(), ProviderRole::Anonymity);
        assert!(provider.is_local());
    }

    #[test]
    fn test_provider_enabled() {
        let mut config = create_test_config();
        config.enabled = false;
        let provider = TorProvider::new(config).unwrap();
        assert!(!provider.is_enabled());
    }

    #[test]
    fn test_parse_bulk_list() {
        let nodes = parse_exit_list("1.2.3.4\n\n  5.6.7.8 \nnot-an-ip\n2001:db8::1\n");
        assert_eq!(nodes.len(), 3);
        assert!(nodes.contains(&"5.6.7.8".parse().unwrap()));
    }

    #[test]
    fn test_parse_exit_addresses_format() {
        let content = "ExitNode 0011BD2485AD45D984EC4159C88FC066E5E3300E\n\
                       Published 2024-01-01 10:00:00\n\
                       LastStatus 2024-01-01 11:00:00\n\
                       ExitAddress 162.247.74.201 2024-01-01 11:12:13\n";
        let nodes = parse_exit_list(content);
        assert_eq!(nodes.len(), 1);
        assert!(nodes.contains(&"162.247.74.201".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_fetch_after_manual_load() {
        let provider = TorProvider::new(create_test_config()).unwrap();
        provider.load_list("1.2.3.4\n");
        mark_fresh(&provider);

        let hit = provider.fetch(&Target::parse("1.2.3.4")).await.unwrap();
        assert_eq!(hit.signals.tor, Some(true));

        let miss = provider.fetch(&Target::parse("5.6.7.8")).await.unwrap();
        assert_eq!(miss.signals.tor, Some(false));
    }

    #[tokio::test]
    async fn test_fetch_without_list_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = create_test_config();
        config.exit_node_list_path = Some(dir.path().join("missing.txt"));
        let provider = TorProvider::new(config).unwrap();

        let result = provider.fetch(&Target::parse("1.2.3.4")).await.unwrap();
        assert_eq!(result.signals.tor, None);
        assert_eq!(provider.exit_node_count(), 0);
    }

    #[tokio::test]
    async fn test_prepare_loads_list_and_fetch_does_not() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "10.9.8.7").unwrap();

        let mut config = create_test_config();
        config.exit_node_list_path = Some(file.path().to_path_buf());
        let provider = TorProvider::new(config).unwrap();

        let before = provider.fetch(&Target::parse("10.9.8.7")).await.unwrap();
        assert_eq!(before.signals.tor, None);
        assert!(provider.last_attempt.read().unwrap().is_none());

        provider.prepare().await.unwrap();
        assert!(provider.last_attempt.read().unwrap().is_some());

        let after = provider.fetch(&Target::parse("10.9.8.7")).await.unwrap();
        assert_eq!(after.signals.tor, Some(true));
    }

    #[tokio::test]
    async fn test_prepare_skips_fresh_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = create_test_config();
        config.exit_node_list_path = Some(dir.path().join("missing.txt"));
        let provider = TorProvider::new(config).unwrap();
        provider.load_list("1.2.3.4\n");
        mark_fresh(&provider);

        // The missing file is never read while the list is fresh
        provider.prepare().await.unwrap();
        assert_eq!(provider.exit_node_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = create_test_config();
        config.exit_node_list_path = Some(dir.path().join("missing.txt"));
        let provider = TorProvider::new(config).unwrap();
        provider.load_list("1.2.3.4\n");

        assert!(provider.prepare().await.is_err());
        assert!(provider.last_attempt.read().unwrap().is_some());
        assert_eq!(provider.exit_node_count(), 1);
    }

    #[tokio::test]
    async fn test_init_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "10.9.8.7").unwrap();
        writeln!(file, "10.9.8.6").unwrap();

        let mut config = create_test_config();
        config.exit_node_list_path = Some(file.path().to_path_buf());
        let provider = TorProvider::new(config).unwrap();

        provider.init().await.unwrap();
        assert_eq!(provider.exit_node_count(), 2);
    }
}
