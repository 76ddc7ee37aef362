//! Browser pool: N persistent CDP WebSocket connections to the remote
//! browser service, multiplexing logical fetches as one-shot tabs.
//!
//! Slot lifecycle is `Disconnected -> Connecting -> Connected -> Stale ->
//! Disconnected`. The per-slot async mutex doubles as the single-flight
//! connect guard; counters live in atomics so `status()` and dispatch never
//! contend with an in-flight connect. A keepalive blank tab pins each remote
//! browser instance alive while no work tabs are open.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::core::config::ServiceConfig;
use crate::core::error::FetchError;
use crate::core::event_log::EventLog;

/// Tabs served on one connection before it is recycled. Bounds memory
/// leakage in the remote browser across long runs.
pub const MAX_TABS_BEFORE_RECYCLE: u64 = 200;

const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);
const KEEPALIVE_URL: &str = "about:blank";

/// Everything the pool needs to (re)connect, captured from live config at
/// connect time. Config changes apply on the next reconnect.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub ws_url: String,
    pub stealth: bool,
    pub proxy_url: Option<String>,
    pub headless: bool,
}

impl PoolSettings {
    /// None when no remote browser endpoint is configured.
    pub fn from_config(cfg: &ServiceConfig) -> Option<Self> {
        cfg.browserless_url.as_ref().map(|ws_url| Self {
            ws_url: ws_url.clone(),
            stealth: cfg.browser_stealth,
            proxy_url: cfg.proxy_url.clone(),
            headless: cfg.browser_headless,
        })
    }
}

/// Build the CDP connect URL: stealth path, URL-encoded proxy flag, and a
/// launch blob carrying window size and automation-suppression flags.
pub fn build_connect_url(settings: &PoolSettings) -> Result<String> {
    let mut url = Url::parse(&settings.ws_url)
        .with_context(|| format!("invalid browser endpoint '{}'", settings.ws_url))?;

    if settings.stealth {
        let path = url.path().trim_end_matches('/').to_string();
        url.set_path(&format!("{path}/chrome/stealth"));
    }

    let launch = serde_json::json!({
        "headless": settings.headless,
        "args": [
            "--window-size=1920,1080",
            "--disable-blink-features=AutomationControlled",
        ],
    });

    {
        let mut pairs = url.query_pairs_mut();
        if let Some(proxy) = &settings.proxy_url {
            pairs.append_pair("--proxy-server", proxy);
        }
        pairs.append_pair("launch", &launch.to_string());
    }

    Ok(url.to_string())
}

struct SlotConn {
    browser: Option<Browser>,
    keepalive: Option<Page>,
}

pub struct BrowserSlot {
    id: usize,
    conn: Mutex<SlotConn>,
    active_tabs: AtomicUsize,
    tabs_used: AtomicU64,
    stale: AtomicBool,
    connected: AtomicBool,
    /// Bumped on every (re)connect so a dying handler task for an old
    /// connection cannot clear the flag of its replacement.
    generation: AtomicU64,
}

impl BrowserSlot {
    fn new(id: usize) -> Arc<Self> {
        Arc::new(Self {
            id,
            conn: Mutex::new(SlotConn {
                browser: None,
                keepalive: None,
            }),
            active_tabs: AtomicUsize::new(0),
            tabs_used: AtomicU64::new(0),
            stale: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Ensure the slot holds a live connection, recycling first when it is
    /// stale and idle. Caller must not hold `conn` — the lock taken here is
    /// the single-flight guard against duplicate connects.
    async fn ensure_connected(
        slot: &Arc<Self>,
        settings: &PoolSettings,
        events: &EventLog,
    ) -> Result<(), FetchError> {
        let mut conn = slot.conn.lock().await;

        let stale = slot.stale.load(Ordering::SeqCst);
        let idle = slot.active_tabs.load(Ordering::SeqCst) == 0;
        if conn.browser.is_some() && stale && idle {
            info!(
                "Pool slot {}: recycling after {} tabs",
                slot.id,
                slot.tabs_used.load(Ordering::SeqCst)
            );
            events.info(format!("browser pool: recycling slot {}", slot.id));
            slot.teardown_locked(&mut conn);
        }

        if conn.browser.is_some() && slot.connected.load(Ordering::SeqCst) {
            return Ok(());
        }

        // Connection handle present but the handler stream ended: the remote
        // side dropped us. Clear and reconnect.
        if conn.browser.is_some() {
            warn!("Pool slot {}: connection lost, reconnecting", slot.id);
            events.warn(format!("browser pool: slot {} lost connection", slot.id));
            slot.teardown_locked(&mut conn);
        }

        let connect_url = build_connect_url(settings).map_err(FetchError::Engine)?;
        debug!("Pool slot {}: connecting", slot.id);

        let (browser, mut handler) = Browser::connect(connect_url).await.map_err(|e| {
            FetchError::PoolDisconnected(format!("slot {} connect failed: {}", slot.id, e))
        })?;

        let generation = slot.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let watcher = Arc::clone(slot);
        tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Pool slot {} CDP handler: {}", watcher.id, e);
                }
            }
            // Stream end means the WebSocket closed. Only clear the flag if
            // no newer connection has taken over this slot.
            if watcher.generation.load(Ordering::SeqCst) == generation {
                watcher.connected.store(false, Ordering::SeqCst);
                debug!(
                    "Pool slot {}: handler ended, marked disconnected",
                    watcher.id
                );
            }
        });

        let keepalive = match browser.new_page(KEEPALIVE_URL).await {
            Ok(page) => Some(page),
            Err(e) => {
                warn!("Pool slot {}: keepalive tab failed: {}", slot.id, e);
                None
            }
        };

        conn.browser = Some(browser);
        conn.keepalive = keepalive;
        slot.tabs_used.store(0, Ordering::SeqCst);
        slot.stale.store(false, Ordering::SeqCst);
        slot.connected.store(true, Ordering::SeqCst);
        info!("Pool slot {}: connected", slot.id);

        Ok(())
    }

    fn teardown_locked(&self, conn: &mut SlotConn) {
        if let Some(page) = conn.keepalive.take() {
            tokio::spawn(async move {
                let _ = page.close().await;
            });
        }
        // Dropping the Browser handle closes the WebSocket transport.
        conn.browser = None;
        self.connected.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.tabs_used.store(0, Ordering::SeqCst);
        self.stale.store(false, Ordering::SeqCst);
    }

    /// Mark one tab handed out; flips the slot stale once the recycle
    /// threshold is crossed. In-flight tabs on a stale slot keep running.
    fn note_tab_opened(&self) {
        self.active_tabs.fetch_add(1, Ordering::SeqCst);
        let used = self.tabs_used.fetch_add(1, Ordering::SeqCst) + 1;
        if used >= MAX_TABS_BEFORE_RECYCLE && !self.stale.swap(true, Ordering::SeqCst) {
            info!(
                "Pool slot {}: hit {} tabs, marked for recycling",
                self.id, used
            );
        }
    }
}

/// One work tab leased from a slot. Dropping the lease decrements the
/// active-tab count and closes the page best-effort, so cancellation and
/// error paths can never leak tabs.
pub struct TabLease {
    slot: Arc<BrowserSlot>,
    page: Option<Page>,
}

impl TabLease {
    pub fn page(&self) -> &Page {
        self.page.as_ref().expect("page present until drop")
    }

    /// Open another tab on the same underlying browser connection, sharing
    /// its cookie/session context. Used by advanced mode for binary
    /// downloads; sibling tabs are not counted against the recycle budget.
    pub async fn open_sibling(&self) -> Result<Page, FetchError> {
        let conn = self.slot.conn.lock().await;
        let browser = conn.browser.as_ref().ok_or_else(|| {
            FetchError::PoolDisconnected(format!("slot {} has no connection", self.slot.id))
        })?;
        browser
            .new_page(KEEPALIVE_URL)
            .await
            .map_err(|e| FetchError::PoolDisconnected(format!("sibling tab failed: {e}")))
    }
}

impl Drop for TabLease {
    fn drop(&mut self) {
        self.slot.active_tabs.fetch_sub(1, Ordering::SeqCst);
        if let Some(page) = self.page.take() {
            tokio::spawn(async move {
                let _ = page.close().await;
            });
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotStatus {
    pub id: usize,
    pub connected: bool,
    pub active_tabs: usize,
    pub tabs_used: u64,
    pub stale: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStatus {
    pub slots: Vec<SlotStatus>,
    pub connected_slots: usize,
    pub total_active_tabs: usize,
}

pub struct TabFetch {
    pub status_code: u16,
    pub content: String,
    pub final_url: String,
}

pub struct BrowserPool {
    slots: Vec<Arc<BrowserSlot>>,
    cursor: AtomicUsize,
    events: Arc<EventLog>,
}

impl BrowserPool {
    pub fn new(size: usize, events: Arc<EventLog>) -> Arc<Self> {
        let size = size.max(1);
        Arc::new(Self {
            slots: (0..size).map(BrowserSlot::new).collect(),
            cursor: AtomicUsize::new(0),
            events,
        })
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Idempotent eager warm-up of every slot, in parallel. Individual slot
    /// failures are reported but do not abort the others.
    pub async fn connect(&self, settings: &PoolSettings) -> Result<(), FetchError> {
        let results = futures::future::join_all(
            self.slots
                .iter()
                .map(|slot| BrowserSlot::ensure_connected(slot, settings, &self.events)),
        )
        .await;

        let failures: Vec<String> = results
            .into_iter()
            .filter_map(|r| r.err().map(|e| e.to_string()))
            .collect();

        if failures.len() == self.slots.len() {
            return Err(FetchError::PoolDisconnected(format!(
                "no slot could connect: {}",
                failures.join("; ")
            )));
        }
        for failure in failures {
            warn!("Pool warm-up: {}", failure);
        }
        Ok(())
    }

    /// Close keepalives and detach every slot.
    pub async fn disconnect(&self) {
        for slot in &self.slots {
            let mut conn = slot.conn.lock().await;
            slot.teardown_locked(&mut conn);
        }
        info!("Browser pool disconnected");
    }

    pub fn status(&self) -> PoolStatus {
        let slots: Vec<SlotStatus> = self
            .slots
            .iter()
            .map(|s| SlotStatus {
                id: s.id,
                connected: s.is_connected(),
                active_tabs: s.active_tabs.load(Ordering::SeqCst),
                tabs_used: s.tabs_used.load(Ordering::SeqCst),
                stale: s.stale.load(Ordering::SeqCst),
            })
            .collect();

        PoolStatus {
            connected_slots: slots.iter().filter(|s| s.connected).count(),
            total_active_tabs: slots.iter().map(|s| s.active_tabs).sum(),
            slots,
        }
    }

    pub fn any_connected(&self) -> bool {
        self.slots.iter().any(|s| s.is_connected())
    }

    fn next_slot(&self) -> Arc<BrowserSlot> {
        let idx = self.cursor.fetch_add(1, Ordering::SeqCst) % self.slots.len();
        Arc::clone(&self.slots[idx])
    }

    /// Lease a fresh tab on the next round-robin slot without navigating.
    /// Advanced mode drives its own navigation and hooks.
    pub async fn acquire_tab(&self, settings: &PoolSettings) -> Result<TabLease, FetchError> {
        let slot = self.next_slot();
        self.lease_on(&slot, settings).await
    }

    async fn lease_on(
        &self,
        slot: &Arc<BrowserSlot>,
        settings: &PoolSettings,
    ) -> Result<TabLease, FetchError> {
        BrowserSlot::ensure_connected(slot, settings, &self.events).await?;

        let page = {
            let conn = slot.conn.lock().await;
            let browser = conn.browser.as_ref().ok_or_else(|| {
                FetchError::PoolDisconnected(format!("slot {} has no connection", slot.id))
            })?;
            browser.new_page(KEEPALIVE_URL).await.map_err(|e| {
                FetchError::PoolDisconnected(format!("slot {} tab open failed: {}", slot.id, e))
            })?
        };

        slot.note_tab_opened();
        Ok(TabLease {
            slot: Arc::clone(slot),
            page: Some(page),
        })
    }

    /// Navigate a one-shot tab and return the rendered DOM. Picks the next
    /// slot round-robin; if the connection drops mid-flight, reconnects and
    /// retries once on the same slot before surfacing the error.
    pub async fn fetch_in_tab(
        &self,
        settings: &PoolSettings,
        url: &str,
        render_delay_ms: u64,
    ) -> Result<TabFetch, FetchError> {
        let slot = self.next_slot();

        match self.tab_fetch_on(&slot, settings, url, render_delay_ms).await {
            Ok(fetched) => Ok(fetched),
            Err(first) => {
                if slot.is_connected() {
                    return Err(first);
                }
                warn!(
                    "Pool slot {}: fetch failed with dead connection ({}), retrying once",
                    slot.id, first
                );
                self.events
                    .warn(format!("browser pool: slot {} retrying after drop", slot.id));
                self.tab_fetch_on(&slot, settings, url, render_delay_ms).await
            }
        }
    }

    async fn tab_fetch_on(
        &self,
        slot: &Arc<BrowserSlot>,
        settings: &PoolSettings,
        url: &str,
        render_delay_ms: u64,
    ) -> Result<TabFetch, FetchError> {
        let lease = self.lease_on(slot, settings).await?;
        let page = lease.page();

        tokio::time::timeout(NAVIGATION_TIMEOUT, page.goto(url))
            .await
            .map_err(|_| {
                FetchError::Engine(anyhow!("navigation to {} timed out after 30s", url))
            })?
            .map_err(|e| FetchError::Engine(anyhow!("navigation to {} failed: {}", url, e)))?;

        if render_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(render_delay_ms)).await;
        }

        let content = page
            .content()
            .await
            .map_err(|e| FetchError::Engine(anyhow!("reading DOM of {} failed: {}", url, e)))?;

        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        // The remote browser gives us no top-level response object here;
        // a completed navigation reports as 200.
        Ok(TabFetch {
            status_code: 200,
            content,
            final_url,
        })
    }
}
