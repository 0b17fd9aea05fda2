use crate::browser::BrowserPool;
use crate::config::Config;
use crate::fetch::Fetcher;
use crate::metrics::Metrics;
use crate::registry::Registry;
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;

/// Shared, read-only per-process state. Nothing here is mutated during
/// request handling; the browser pool manages its own interior locking.
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Registry,
    pub fetcher: Fetcher,
    pub browser: Arc<BrowserPool>,
    pub metrics: Arc<Metrics>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let fetcher = Fetcher::new(&config)?;
        let browser = Arc::new(BrowserPool::new(&config));
        let metrics = Arc::new(Metrics::new());
        Ok(AppState {
            config,
            registry: Registry::with_defaults(),
            fetcher,
            browser,
            metrics,
            started_at: Instant::now(),
        })
    }
}
