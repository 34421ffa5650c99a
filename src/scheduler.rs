//! Rate-aware batch lookup scheduler.
//!
//! A single coordinator owns the prefix cache and every queue. Lookups run
//! as jobs on a [`JoinSet`] bounded by `max_workers` and hand their outcome
//! back to the coordinator, which is the only place state changes.
//!
//! Per target:
//!
//! ```text
//! Pending ──cache hit──────────────────────────▶ Done (Success (Cache))
//!    │
//!    └──▶ InFlight ──success───────────────────▶ Done (Success (IPvN API))
//!            │     └─other failure─────────────▶ Done (failure, never retried)
//!            └──rate limited──▶ Deferred ──retry_not_before──▶ Pending
//! ```
//!
//! Targets sharing a prefix with an in-flight lookup are held back until it
//! finishes, so each prefix costs at most one external call per TTL window.

use crate::cache::{CacheKey, PrefixCache};
use crate::error::{FailureKind, LookupFailure};
use crate::locale::Locale;
use crate::merge::{self, classify_anonymity};
use crate::providers::{Provider, ProviderError, ProviderResult, ProviderRole};
use crate::record::{CanonicalRecord, LookupStatus};
use crate::target::Target;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// Upper bound on how long a cancellation goes unnoticed.
pub const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-batch tuning.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Concurrent lookups.
    pub max_workers: usize,
    /// Sleep before each job's first provider call.
    pub inter_request_delay: Duration,
    /// Minimum deferral after a rate-limit response.
    pub rate_limit_wait: Duration,
    pub cache_ttl: Duration,
    pub cache_netmask_v4: u8,
    pub cache_netmask_v6: u8,
    pub cache_max_entries: usize,
    pub enable_registry_lookup: bool,
    pub enable_risk_check: bool,
    pub enable_anonymity_check: bool,
    /// Run enrichment for every target, not only suspicious ones.
    pub enrich_all: bool,
    /// Hard limit on a single provider call.
    pub provider_timeout: Duration,
    /// No provider calls at all.
    pub offline: bool,
    pub locale: Locale,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_workers: 1,
            inter_request_delay: Duration::from_millis(2500),
            rate_limit_wait: Duration::from_secs(120),
            cache_ttl: crate::cache::DEFAULT_CACHE_TTL,
            cache_netmask_v4: crate::cache::DEFAULT_NETMASK_V4,
            cache_netmask_v6: crate::cache::DEFAULT_NETMASK_V6,
            cache_max_entries: crate::cache::DEFAULT_MAX_ENTRIES,
            enable_registry_lookup: true,
            enable_risk_check: true,
            enable_anonymity_check: true,
            enrich_all: false,
            provider_timeout: Duration::from_secs(10),
            offline: false,
            locale: Locale::Raw,
        }
    }
}

impl BatchOptions {
    /// Empty prefix cache sized and timed by these options.
    pub fn new_cache(&self) -> PrefixCache {
        PrefixCache::new(
            self.cache_ttl,
            self.cache_netmask_v4,
            self.cache_netmask_v6,
            self.cache_max_entries,
        )
    }

    fn role_enabled(&self, role: ProviderRole) -> bool {
        match role {
            ProviderRole::Geo => false,
            ProviderRole::Registry => self.enable_registry_lookup,
            ProviderRole::Anonymity => self.enable_anonymity_check,
            ProviderRole::Risk => self.enable_risk_check,
        }
    }
}

/// Shared cancellation flag. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the context can run another batch.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Point-in-time view of a running batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total: usize,
    /// Targets with a finished record.
    pub processed: usize,
    pub in_flight: usize,
    pub deferred: usize,
    pub cache_size: usize,
    /// Extrapolated from the lookup rate so far; `None` until a lookup finishes.
    pub estimated_remaining: Option<Duration>,
    /// Time until the earliest deferred target becomes eligible.
    pub next_retry_in: Option<Duration>,
}

/// State that outlives a single batch: the prefix cache, the cancel flag
/// and the progress channel.
#[derive(Debug)]
pub struct BatchContext {
    cache: PrefixCache,
    cancel: CancelFlag,
    progress: watch::Sender<ProgressSnapshot>,
}

impl BatchContext {
    pub fn new(cache: PrefixCache) -> Self {
        let (progress, _) = watch::channel(ProgressSnapshot::default());
        Self {
            cache,
            cancel: CancelFlag::new(),
            progress,
        }
    }

    pub fn cache(&self) -> &PrefixCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut PrefixCache {
        &mut self.cache
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Handle for cancelling a running batch from elsewhere.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<ProgressSnapshot> {
        self.progress.subscribe()
    }
}

/// Providers a batch consults, in priority order.
#[derive(Clone, Default)]
pub struct ProviderSet {
    /// Organization/country sources; the first success wins.
    pub geo: Vec<Arc<dyn Provider>>,
    /// Registry, anonymity and risk sources.
    pub enrichers: Vec<Arc<dyn Provider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geo(mut self, provider: Arc<dyn Provider>) -> Self {
        self.geo.push(provider);
        self
    }

    pub fn with_enricher(mut self, provider: Arc<dyn Provider>) -> Self {
        self.enrichers.push(provider);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.geo.is_empty() && self.enrichers.is_empty()
    }

    /// Names of all providers, for logging.
    pub fn names(&self) -> Vec<String> {
        self.geo
            .iter()
            .chain(self.enrichers.iter())
            .map(|p| p.name().to_string())
            .collect()
    }
}

/// A target still waiting out a rate limit when the batch stopped.
#[derive(Debug, Clone, Serialize)]
pub struct DeferredEntry {
    pub target: Target,
    #[serde(skip)]
    pub retry_not_before: Instant,
}

impl DeferredEntry {
    pub fn status(&self, now: Instant) -> LookupStatus {
        LookupStatus::Deferred {
            retry_in: self.retry_not_before.saturating_duration_since(now),
        }
    }
}

/// Result of one batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Finished records in input order.
    pub records: Vec<CanonicalRecord>,
    /// Targets never finished because the batch was cancelled.
    pub unresolved: Vec<Target>,
    /// Targets that were waiting on a rate limit when the batch was cancelled.
    pub deferred: Vec<DeferredEntry>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

/// What a lookup job hands back to the coordinator.
#[derive(Debug)]
enum JobOutcome {
    /// `results[0]` is the geo answer.
    Success {
        results: Vec<ProviderResult>,
        errors: BTreeMap<String, String>,
    },
    RateLimited {
        retry_after: Option<Duration>,
    },
    Failed(LookupFailure),
}

struct Job {
    target: Target,
    providers: ProviderSet,
    options: Arc<BatchOptions>,
}

/// Runs batches against a fixed provider set.
pub struct Scheduler {
    providers: ProviderSet,
    options: Arc<BatchOptions>,
}

impl Scheduler {
    pub fn new(providers: ProviderSet, options: BatchOptions) -> Self {
        Self {
            providers,
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    /// Run one batch to completion or cancellation.
    pub async fn run(&self, ctx: &mut BatchContext, targets: Vec<Target>) -> BatchReport {
        let mut batch = Batch::new(self, ctx, targets);
        batch.drive().await;
        batch.into_report()
    }
}

struct Batch<'a> {
    scheduler: &'a Scheduler,
    ctx: &'a mut BatchContext,
    targets: Vec<Target>,
    records: Vec<Option<CanonicalRecord>>,
    pending: VecDeque<usize>,
    /// Targets waiting for an in-flight lookup of the same prefix.
    held: HashMap<CacheKey, Vec<usize>>,
    busy_prefixes: HashSet<CacheKey>,
    in_flight: HashMap<usize, Option<CacheKey>>,
    deferred: HashMap<usize, Instant>,
    workers: JoinSet<(usize, JobOutcome)>,
    started: Instant,
    /// Targets finished by a provider lookup, for the ETA.
    looked_up: usize,
    lookups_total: usize,
    cancelled: bool,
}

enum Wake {
    Joined(Option<Result<(usize, JobOutcome), tokio::task::JoinError>>),
    Timer,
}

impl<'a> Batch<'a> {
    fn new(scheduler: &'a Scheduler, ctx: &'a mut BatchContext, targets: Vec<Target>) -> Self {
        let mut seen = HashSet::new();
        let targets: Vec<Target> = targets
            .into_iter()
            .filter(|t| seen.insert(t.normalized().to_string()))
            .collect();

        let offline = scheduler.options.offline;
        let mut records = Vec::with_capacity(targets.len());
        let mut pending = VecDeque::new();

        for (i, target) in targets.iter().enumerate() {
            if offline {
                records.push(Some(CanonicalRecord::offline(target.clone())));
            } else if !target.is_ip() {
                records.push(Some(CanonicalRecord::hostname(target.clone())));
            } else {
                records.push(None);
                pending.push_back(i);
            }
        }

        let lookups_total = pending.len();

        Self {
            scheduler,
            ctx,
            targets,
            records,
            pending,
            held: HashMap::new(),
            busy_prefixes: HashSet::new(),
            in_flight: HashMap::new(),
            deferred: HashMap::new(),
            workers: JoinSet::new(),
            started: Instant::now(),
            looked_up: 0,
            lookups_total,
            cancelled: false,
        }
    }

    async fn drive(&mut self) {
        info!(
            targets = self.targets.len(),
            lookups = self.lookups_total,
            max_workers = self.scheduler.options.max_workers,
            "Starting batch"
        );

        if !self.scheduler.options.offline && self.lookups_total > 0 {
            self.prepare_local().await;
        }

        loop {
            if self.ctx.cancel.is_cancelled() {
                self.cancelled = true;
                break;
            }

            self.promote_ready(Instant::now());
            self.dispatch().await;
            self.publish();

            if self.pending.is_empty() && self.workers.is_empty() && self.deferred.is_empty() {
                break;
            }

            let has_workers = !self.workers.is_empty();
            let next_retry = self.next_retry();
            let retry_at = next_retry.unwrap_or_else(|| Instant::now() + CANCEL_POLL_INTERVAL);

            let wake = tokio::select! {
                joined = self.workers.join_next(), if has_workers => Wake::Joined(joined),
                _ = sleep_until(retry_at), if next_retry.is_some() => Wake::Timer,
                _ = sleep(CANCEL_POLL_INTERVAL) => Wake::Timer,
            };

            match wake {
                Wake::Joined(Some(Ok((index, outcome)))) => self.complete(index, outcome),
                Wake::Joined(Some(Err(e))) => error!(error = %e, "Lookup job failed to join"),
                Wake::Joined(None) | Wake::Timer => {}
            }
        }

        if self.cancelled {
            let detached = self.workers.len();
            self.workers.detach_all();
            info!(
                in_flight = detached,
                deferred = self.deferred.len(),
                "Batch cancelled"
            );
        } else {
            info!(
                records = self.records.len(),
                elapsed_ms = self.started.elapsed().as_millis() as u64,
                "Batch complete"
            );
        }

        self.publish();
    }

    async fn prepare_local(&self) {
        for provider in self
            .scheduler
            .providers
            .enrichers
            .iter()
            .filter(|p| p.is_enabled() && p.is_local())
        {
            // A failed refresh keeps whatever state the provider had
            if let Err(e) = provider.prepare().await {
                warn!(provider = provider.name(), error = %e, "Failed to prepare local provider");
            }
        }
    }

    fn promote_ready(&mut self, now: Instant) {
        let mut ready: Vec<usize> = self
            .deferred
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(i, _)| *i)
            .collect();
        ready.sort_unstable();

        for index in ready {
            self.deferred.remove(&index);
            debug!(ip = %self.targets[index], "Deferred target eligible again");
            self.pending.push_back(index);
        }
    }

    fn next_retry(&self) -> Option<Instant> {
        self.deferred.values().min().copied()
    }

    async fn dispatch(&mut self) {
        let max_workers = self.scheduler.options.max_workers.max(1);
        let locale = self.scheduler.options.locale;

        while let Some(index) = self.pending.pop_front() {
            let key = self.ctx.cache.derive_key(&self.targets[index]);

            if let Some(key) = key {
                if let Some(entry) = self.ctx.cache.get(&key).cloned() {
                    debug!(ip = %self.targets[index], prefix = %key, "Cache hit");
                    let target = &self.targets[index];
                    let (local, errors) = local_checks(
                        &self.scheduler.providers,
                        &self.scheduler.options,
                        target,
                    )
                    .await;
                    let mut record = merge::from_cache(target, &entry, &local, locale);
                    record.provider_errors = errors;
                    self.records[index] = Some(record);
                    continue;
                }
                if self.busy_prefixes.contains(&key) {
                    self.held.entry(key).or_default().push(index);
                    continue;
                }
            }

            if self.workers.len() >= max_workers {
                self.pending.push_front(index);
                break;
            }

            self.spawn(index, key);
        }
    }

    fn spawn(&mut self, index: usize, key: Option<CacheKey>) {
        let job = Job {
            target: self.targets[index].clone(),
            providers: self.scheduler.providers.clone(),
            options: Arc::clone(&self.scheduler.options),
        };

        // The inner task isolates panics so the index always comes back
        self.workers.spawn(async move {
            let outcome = match tokio::spawn(lookup(job)).await {
                Ok(outcome) => outcome,
                Err(e) => JobOutcome::Failed(LookupFailure::new(
                    FailureKind::Internal,
                    format!("lookup task failed: {}", e),
                )),
            };
            (index, outcome)
        });

        if let Some(key) = key {
            self.busy_prefixes.insert(key);
        }
        self.in_flight.insert(index, key);
    }

    fn complete(&mut self, index: usize, outcome: JobOutcome) {
        let key = self.in_flight.remove(&index).flatten();
        let held = match key {
            Some(key) => {
                self.busy_prefixes.remove(&key);
                self.held.remove(&key).unwrap_or_default()
            }
            None => Vec::new(),
        };

        let target = &self.targets[index];
        let options = &self.scheduler.options;

        match outcome {
            JobOutcome::Success { results, errors } => {
                if let (Some(key), Some(geo)) = (key, results.first()) {
                    if let (Some(org), Some(cc)) = (&geo.organization, &geo.country_code) {
                        self.ctx
                            .cache
                            .put(key, org, cc, geo.country_name.as_deref());
                    }
                }

                let mut record = merge::merge(target, &results, options.locale);
                record.provider_errors = errors;
                debug!(
                    ip = %target,
                    organization = ?record.organization_raw,
                    country = ?record.country_code,
                    anonymity = %record.anonymity,
                    "Lookup complete"
                );

                self.records[index] = Some(record);
                self.looked_up += 1;
                self.requeue_front(held);
            }
            JobOutcome::RateLimited { retry_after } => {
                let wait = retry_after
                    .map_or(options.rate_limit_wait, |hint| hint.max(options.rate_limit_wait));
                let retry_not_before = Instant::now() + wait;
                info!(
                    ip = %target,
                    retry_in_secs = wait.as_secs(),
                    "Rate limited, deferring target"
                );

                self.deferred.insert(index, retry_not_before);
                // Same prefix would hit the same limit
                for h in held {
                    self.deferred.insert(h, retry_not_before);
                }
            }
            JobOutcome::Failed(failure) => {
                warn!(ip = %target, error = %failure, "Lookup failed");
                self.records[index] = Some(CanonicalRecord::failed(target.clone(), failure));
                self.looked_up += 1;
                self.requeue_front(held);
            }
        }
    }

    fn requeue_front(&mut self, indices: Vec<usize>) {
        for index in indices.into_iter().rev() {
            self.pending.push_front(index);
        }
    }

    fn publish(&self) {
        let now = Instant::now();
        let processed = self.records.iter().filter(|r| r.is_some()).count();

        let estimated_remaining = if self.looked_up > 0 {
            let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
            let rate = self.looked_up as f64 / elapsed.max(f64::EPSILON);
            let remaining = self.lookups_total.saturating_sub(self.looked_up) as f64;
            Some(Duration::from_secs_f64((remaining / rate).ceil()))
        } else {
            None
        };

        self.ctx.progress.send_replace(ProgressSnapshot {
            total: self.targets.len(),
            processed,
            in_flight: self.workers.len(),
            deferred: self.deferred.len(),
            cache_size: self.ctx.cache.len(),
            estimated_remaining,
            next_retry_in: self
                .next_retry()
                .map(|at| at.saturating_duration_since(now)),
        });
    }

    fn into_report(self) -> BatchReport {
        let mut unresolved: Vec<usize> = self
            .pending
            .iter()
            .copied()
            .chain(self.held.values().flatten().copied())
            .chain(self.in_flight.keys().copied())
            .collect();
        unresolved.sort_unstable();
        unresolved.dedup();

        let mut deferred: Vec<(usize, Instant)> =
            self.deferred.iter().map(|(i, at)| (*i, *at)).collect();
        deferred.sort_unstable_by_key(|(i, _)| *i);

        BatchReport {
            unresolved: unresolved
                .into_iter()
                .map(|i| self.targets[i].clone())
                .collect(),
            deferred: deferred
                .into_iter()
                .map(|(i, retry_not_before)| DeferredEntry {
                    target: self.targets[i].clone(),
                    retry_not_before,
                })
                .collect(),
            records: self.records.into_iter().flatten().collect(),
            cancelled: self.cancelled,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Run the enabled local providers for a target served from the cache.
async fn local_checks(
    providers: &ProviderSet,
    options: &BatchOptions,
    target: &Target,
) -> (Vec<ProviderResult>, BTreeMap<String, String>) {
    let mut results = Vec::new();
    let mut errors = BTreeMap::new();

    for provider in providers
        .enrichers
        .iter()
        .filter(|p| p.is_enabled() && p.is_local() && options.role_enabled(p.role()))
    {
        match call(provider.as_ref(), target, options.provider_timeout).await {
            Ok(result) => results.push(result),
            Err(e) => {
                warn!(provider = provider.name(), ip = %target, error = %e, "Local check failed");
                errors.insert(provider.name().to_string(), e.to_string());
            }
        }
    }

    (results, errors)
}

/// Call a provider under the batch's hard timeout.
async fn call(
    provider: &dyn Provider,
    target: &Target,
    timeout: Duration,
) -> Result<ProviderResult, ProviderError> {
    debug!(provider = provider.name(), ip = %target, "Calling provider");
    match tokio::time::timeout(timeout, provider.fetch(target)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout),
    }
}

/// One target's lookup: geo providers in priority order, then enrichment.
async fn lookup(job: Job) -> JobOutcome {
    let Job {
        target,
        providers,
        options,
    } = job;

    if !options.inter_request_delay.is_zero() {
        sleep(options.inter_request_delay).await;
    }

    let mut rate_limited = false;
    let mut retry_after: Option<Duration> = None;
    let mut last_error: Option<ProviderError> = None;
    let mut geo: Option<ProviderResult> = None;

    for provider in providers.geo.iter().filter(|p| p.is_enabled()) {
        match call(provider.as_ref(), &target, options.provider_timeout).await {
            Ok(result) => {
                geo = Some(result);
                break;
            }
            Err(ProviderError::RateLimited { retry_after: hint }) => {
                debug!(provider = provider.name(), ip = %target, "Provider rate limited");
                rate_limited = true;
                retry_after = retry_after.max(hint);
            }
            Err(e) => {
                debug!(provider = provider.name(), ip = %target, error = %e, "Provider failed");
                last_error = Some(e);
            }
        }
    }

    let Some(geo) = geo else {
        if rate_limited {
            return JobOutcome::RateLimited { retry_after };
        }
        return JobOutcome::Failed(match last_error {
            Some(e) => LookupFailure::from(&e),
            None => LookupFailure::new(FailureKind::Internal, "no geo provider enabled"),
        });
    };

    let suspicious = classify_anonymity(&geo.signals, geo.organization.as_deref()).is_anonymous();
    let enrich = options.enrich_all || suspicious;

    let mut results = vec![geo];
    let mut errors = BTreeMap::new();

    for provider in providers.enrichers.iter().filter(|p| p.is_enabled()) {
        if !options.role_enabled(provider.role()) || !(enrich || provider.is_local()) {
            continue;
        }

        match call(provider.as_ref(), &target, options.provider_timeout).await {
            Ok(result) => results.push(result),
            Err(e) => {
                // Rate-limited enrichment simply counts as not checked
                if !e.is_rate_limited() {
                    warn!(provider = provider.name(), ip = %target, error = %e, "Enrichment failed");
                }
                errors.insert(provider.name().to_string(), e.to_string());
            }
        }
    }

    JobOutcome::Success { results, errors }
}
