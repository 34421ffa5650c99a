//! Engine façade: builds providers from configuration and runs batches.

use crate::config::Config;
use crate::error::EngineError;
use crate::providers::abuseipdb::AbuseIPDBProvider;
use crate::providers::internetdb::InternetDbProvider;
use crate::providers::ip_api::IpApiProvider;
use crate::providers::ipinfo::IpInfoProvider;
use crate::providers::rdap::RdapProvider;
use crate::providers::tor::TorProvider;
use crate::providers::ProviderError;
use crate::scheduler::{BatchContext, BatchOptions, BatchReport, ProviderSet, Scheduler};
use crate::target::{classify, Classified, Target};
use std::sync::Arc;
use tracing::{info, warn};

/// Batch enrichment engine.
pub struct Engine {
    scheduler: Scheduler,
}

impl Engine {
    /// Create an engine with the providers enabled in `config`.
    pub async fn new(config: &Config) -> Result<Self, EngineError> {
        let options = config.batch_options();
        if options.max_workers == 0 {
            return Err(EngineError::Config("max_workers must be at least 1".to_string()));
        }

        let mut providers = ProviderSet::new();

        // Premium first; the primary is the fallback
        if let Some(ref ipinfo_config) = config.ipinfo {
            if ipinfo_config.enabled {
                let provider = IpInfoProvider::new(ipinfo_config.clone()).map_err(provider_error("ipinfo"))?;
                providers = providers.with_geo(Arc::new(provider));
                info!("ipinfo provider enabled");
            }
        }

        if config.ip_api.enabled {
            let provider = IpApiProvider::new(config.ip_api.clone()).map_err(provider_error("ip-api"))?;
            providers = providers.with_geo(Arc::new(provider));
            info!("ip-api provider enabled");
        }

        if let Some(ref rdap_config) = config.rdap {
            if rdap_config.enabled {
                let provider = RdapProvider::new(rdap_config.clone()).map_err(provider_error("rdap"))?;
                providers = providers.with_enricher(Arc::new(provider));
                info!("RDAP registry lookup enabled");
            }
        }

        if let Some(ref tor_config) = config.tor {
            if tor_config.enabled {
                let provider = TorProvider::new(tor_config.clone()).map_err(provider_error("tor"))?;
                // Don't fail if the list can't be fetched; each batch retries the refresh
                if !options.offline {
                    if let Err(e) = provider.init().await {
                        warn!(error = %e, "Failed to initialize Tor provider (will retry)");
                    }
                }
                providers = providers.with_enricher(Arc::new(provider));
                info!("Tor exit node detection enabled");
            }
        }

        if let Some(ref abuseipdb_config) = config.abuseipdb {
            if abuseipdb_config.enabled {
                let provider = AbuseIPDBProvider::new(abuseipdb_config.clone())
                    .map_err(provider_error("abuseipdb"))?;
                providers = providers.with_enricher(Arc::new(provider));
                info!("AbuseIPDB provider enabled");
            }
        }

        if config.internetdb.enabled {
            let provider = InternetDbProvider::new(config.internetdb.clone())
                .map_err(provider_error("internetdb"))?;
            providers = providers.with_enricher(Arc::new(provider));
            info!("InternetDB risk check enabled");
        }

        if providers.geo.is_empty() && !options.offline {
            return Err(EngineError::Config("no geo provider enabled".to_string()));
        }

        info!(
            providers = ?providers.names(),
            max_workers = options.max_workers,
            delay_ms = options.inter_request_delay.as_millis() as u64,
            "Enrichment engine initialized"
        );

        Ok(Self::with_providers(providers, options))
    }

    /// Create an engine around an explicit provider set.
    pub fn with_providers(providers: ProviderSet, options: BatchOptions) -> Self {
        Self {
            scheduler: Scheduler::new(providers, options),
        }
    }

    pub fn options(&self) -> &BatchOptions {
        self.scheduler.options()
    }

    /// Names of the configured providers, geo sources first.
    pub fn provider_names(&self) -> Vec<String> {
        self.scheduler.providers().names()
    }

    /// Fresh context with an empty cache sized by this engine's options.
    pub fn new_context(&self) -> BatchContext {
        BatchContext::new(self.options().new_cache())
    }

    /// Look up already classified targets.
    pub async fn run_batch(&self, ctx: &mut BatchContext, targets: Vec<Target>) -> BatchReport {
        self.scheduler.run(ctx, targets).await
    }

    /// Classify raw input lines and look up the resulting targets.
    pub async fn enrich<I, S>(&self, ctx: &mut BatchContext, raw_lines: I) -> (Classified, BatchReport)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let classified = classify(raw_lines);
        info!(
            ips = classified.ip_count(),
            hostnames = classified.hostname_count(),
            "Classified input"
        );
        let report = self.run_batch(ctx, classified.targets.clone()).await;
        (classified, report)
    }

    pub fn clear_cache(&self, ctx: &mut BatchContext) {
        ctx.clear_cache();
        info!("Prefix cache cleared");
    }
}

fn provider_error(name: &'static str) -> impl Fn(ProviderError) -> EngineError {
    move |source| EngineError::Provider {
        name: name.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LookupStatus;

    #[tokio::test]
    async fn test_new_builds_default_providers() {
        let engine = Engine::new(&Config::default()).await.unwrap();
        let names = engine.provider_names();
        assert_eq!(names, vec!["ip-api", "internetdb"]);
    }

    #[tokio::test]
    async fn test_registry_lookup_when_configured() {
        let config: Config = serde_yaml::from_str("rdap:\n  enabled: true").unwrap();
        let engine = Engine::new(&config).await.unwrap();
        assert_eq!(engine.provider_names(), vec!["ip-api", "rdap", "internetdb"]);
    }

    #[tokio::test]
    async fn test_new_rejects_no_geo_provider() {
        let mut config = Config::default();
        config.ip_api.enabled = false;
        assert!(matches!(
            Engine::new(&config).await,
            Err(EngineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_enrich_offline() {
        let mut config = Config::default();
        config.batch.offline = true;
        let engine = Engine::new(&config).await.unwrap();
        let mut ctx = engine.new_context();

        let (classified, report) = engine
            .enrich(&mut ctx, ["8.8.8.B", "example.com", "8.8.8.8"])
            .await;

        assert_eq!(classified.targets.len(), 2);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.records[0].target.normalized(), "8.8.8.8");
        assert!(matches!(report.records[0].status, LookupStatus::Success(_)));
    }

    #[test]
    fn test_clear_cache() {
        let engine = Engine::with_providers(ProviderSet::new(), BatchOptions::default());
        let mut ctx = engine.new_context();
        let key = ctx
            .cache()
            .derive_key(&Target::parse("192.0.2.1"))
            .unwrap();
        ctx.cache_mut().put(key, "Example", "US", None);
        assert_eq!(ctx.cache().len(), 1);

        engine.clear_cache(&mut ctx);
        assert!(ctx.cache().is_empty());
    }
}
