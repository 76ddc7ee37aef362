use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use crate::core::config::{ServiceConfig, ServicePaths, SharedConfig};
use crate::core::event_log::EventLog;
use crate::pool::BrowserPool;
use crate::profiles::ProfileStore;

pub struct AppState {
    pub http_client: reqwest::Client,
    pub config: SharedConfig,
    pub paths: ServicePaths,
    pub pool: Arc<BrowserPool>,
    pub profiles: ProfileStore,
    pub events: Arc<EventLog>,
    pub active_requests: AtomicUsize,
    /// Set once shutdown starts; new and in-flight fetches are cancelled
    /// instead of racing the pool teardown.
    pub draining: AtomicBool,
    pub started_at: Instant,
}

impl AppState {
    /// Wire up every shared component. The browser pool is created cold;
    /// warming it is the caller's decision (and non-fatal when it fails).
    pub async fn initialize(paths: ServicePaths) -> Result<Self> {
        paths.ensure_dirs()?;

        let config = ServiceConfig::load(&paths.data_dir);
        info!(
            "Service config: browserless={}, proxy={}, pool_size={}",
            config.browserless_url.as_deref().unwrap_or("<none>"),
            config.proxy_url.as_deref().unwrap_or("<none>"),
            config.pool_size
        );

        let events = Arc::new(EventLog::new(&paths.logs_dir));
        let pool = BrowserPool::new(config.pool_size, Arc::clone(&events));
        let profiles = ProfileStore::open(&paths.db_path())
            .await
            .context("opening domain profile store")?;

        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .context("building shared HTTP client")?;

        Ok(Self {
            http_client,
            config: SharedConfig::new(config),
            paths,
            pool,
            profiles,
            events,
            active_requests: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
            started_at: Instant::now(),
        })
    }

    pub fn begin_drain(&self) {
        self.draining.store(true, Ordering::SeqCst);
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Track an in-flight request for the status surface. The guard's drop
    /// runs on every exit path, cancellation included.
    pub fn begin_request(&self) -> RequestGuard<'_> {
        self.active_requests.fetch_add(1, Ordering::SeqCst);
        RequestGuard {
            counter: &self.active_requests,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub struct RequestGuard<'a> {
    counter: &'a AtomicUsize,
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}
