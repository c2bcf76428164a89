use std::sync::{Arc, Mutex, RwLock};

use gateway_core::config::{HistoryConfig, Settings};
use gateway_core::context::ContextManager;
use gateway_core::history::SummaryCache;

/// Tallies routing decisions for the admin stats endpoint (§11 supplemented
/// feature: percentage breakdown of which model each request landed on).
#[derive(Debug, Default)]
pub struct RouterStats {
    pub total: u64,
    pub opus: u64,
    pub sonnet: u64,
    pub haiku: u64,
    pub passthrough: u64,
    pub opus_degraded: u64,
}

impl RouterStats {
    pub fn record(&mut self, decision: &gateway_core::model::RoutingDecision, settings: &Settings) {
        self.total += 1;
        if decision.routed_model == settings.routing.opus_model {
            self.opus += 1;
        } else if decision.routed_model == settings.routing.sonnet_model {
            self.sonnet += 1;
        } else if decision.routed_model == settings.routing.haiku_model {
            self.haiku += 1;
        } else {
            self.passthrough += 1;
        }
    }

    /// Records that an Opus dispatch was downgraded to Sonnet because the
    /// concurrency guard's permits were exhausted (§4.5 "opus_degraded").
    pub fn record_opus_degraded(&mut self) {
        self.opus_degraded += 1;
    }

    pub fn percentages(&self) -> (f64, f64, f64, f64) {
        if self.total == 0 {
            return (0.0, 0.0, 0.0, 0.0);
        }
        let total = self.total as f64;
        (
            self.opus as f64 / total * 100.0,
            self.sonnet as f64 / total * 100.0,
            self.haiku as f64 / total * 100.0,
            self.passthrough as f64 / total * 100.0,
        )
    }
}

/// Shared application state handed to every axum handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    /// History thresholds are split out from `settings` behind a `RwLock`
    /// so the admin patch endpoint can retune them without a restart (§11
    /// supplemented feature); every other setting stays fixed at startup.
    pub history_config: Arc<RwLock<HistoryConfig>>,
    pub http_client: reqwest::Client,
    pub summary_cache: Arc<SummaryCache>,
    pub context_manager: Arc<ContextManager>,
    pub router_stats: Arc<Mutex<RouterStats>>,
    /// Bounds simultaneous Opus dispatches (§4.5 concurrency guard). A
    /// request that cannot acquire a permit immediately downgrades to
    /// Sonnet with reason `opus_degraded` instead of queueing.
    pub opus_permits: Arc<tokio::sync::Semaphore>,
}

impl AppState {
    pub fn new(settings: Settings) -> anyhow::Result<Self> {
        let history_config = Arc::new(RwLock::new(settings.history.clone()));
        let opus_permits = Arc::new(tokio::sync::Semaphore::new(settings.routing.opus_max_concurrent));
        let settings = Arc::new(settings);
        let http_client = build_http_client(&settings)?;
        let summary_cache = Arc::new(SummaryCache::new(settings.summary_cache.clone()));
        let context_manager = Arc::new(ContextManager::new(settings.async_summary.max_pending_tasks));

        Ok(Self {
            settings,
            history_config,
            http_client,
            summary_cache,
            context_manager,
            router_stats: Arc::new(Mutex::new(RouterStats::default())),
            opus_permits,
        })
    }

    pub fn current_history_config(&self) -> HistoryConfig {
        self.history_config.read().expect("history config lock poisoned").clone()
    }

    /// Attempts to reserve one of the bounded Opus concurrency slots. Held
    /// for the lifetime of the returned permit; returns `None` if the quota
    /// is currently saturated, in which case the caller downgrades to Sonnet.
    pub fn try_acquire_opus_permit(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        self.opus_permits.clone().try_acquire_owned().ok()
    }
}

/// Builds the upstream HTTP client per §5's pool configuration. HTTP/2 stays
/// off by default: the upstream treats one multiplexed connection as a
/// single logical client, so the gateway needs several real HTTP/1.1
/// connections to get real concurrency.
fn build_http_client(settings: &Settings) -> anyhow::Result<reqwest::Client> {
    let pool = &settings.http_pool;
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool.max_keepalive)
        .pool_idle_timeout(pool.keepalive_expiry)
        .connect_timeout(pool.connect_timeout)
        .timeout(pool.read_timeout);

    builder = if pool.use_http2 {
        builder.http2_prior_knowledge()
    } else {
        builder.http1_only()
    };

    Ok(builder.build()?)
}
