use crate::apikey::ApiKeyStore;
use crate::config::GatewayConfig;
use crate::metrics::Metrics;
use crate::rate_limit::{self, RateLimiterBackend};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Shared gateway state, cheaply cloneable — one instance per process,
/// handed to every connection's `service_fn` closure.
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<GatewayConfig>,
    pub metrics: Metrics,
    pub api_key_store: Arc<ApiKeyStore>,
    pub rate_limiter: Arc<dyn RateLimiterBackend>,
    pub http_client: reqwest::Client,
}

impl GatewayState {
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        let rate_limiter = rate_limit::connect(config.redis_url.as_deref(), config.bypass_rate_limits).await;
        info!("rate_limit: backend={}", rate_limiter.backend_name());

        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(200)
            .pool_idle_timeout(Duration::from_secs(90))
            .timeout(Duration::from_secs(30))
            .build()?;

        let metrics = Metrics::install();

        Ok(Self {
            config: Arc::new(config),
            metrics,
            api_key_store: Arc::new(ApiKeyStore::new()),
            rate_limiter,
            http_client,
        })
    }
}
