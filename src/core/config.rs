//! Service configuration: defaults ← `settings.json` snapshot ← environment.
//!
//! The live record sits behind an atomic swap; the browser pool re-reads it
//! on every connect, so runtime changes take effect at the next reconnect
//! rather than on in-flight tabs.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const ENV_BROWSERLESS_URL: &str = "BROWSERLESS_URL";
pub const ENV_PROXY_URL: &str = "PROXY_URL";
pub const ENV_PORT: &str = "PORT";
pub const ENV_CRAWLER_API_PORT: &str = "CRAWLER_API_PORT";
pub const ENV_DATA_DIR: &str = "DATA_DIR";
pub const ENV_LOGS_DIR: &str = "LOGS_DIR";
pub const ENV_POOL_SIZE: &str = "BROWSER_POOL_SIZE";

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_CRAWLER_API_PORT: u16 = 3311;

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    /// ws/wss endpoint of the remote browser service. None disables the
    /// pooled browser and unblock engines.
    pub browserless_url: Option<String>,
    /// Default outbound proxy for the fast engine and ladder step 1.
    pub proxy_url: Option<String>,
    pub default_engine: String,
    pub browser_stealth: bool,
    pub browser_headless: bool,
    pub pool_size: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            browserless_url: None,
            proxy_url: None,
            default_engine: "auto".to_string(),
            browser_stealth: true,
            browser_headless: true,
            pool_size: 4,
        }
    }
}

impl ServiceConfig {
    /// Load the settings snapshot (if any) and overlay environment variables.
    pub fn load(data_dir: &Path) -> Self {
        let mut cfg = match std::fs::read_to_string(data_dir.join(SETTINGS_FILE)) {
            Ok(raw) => match serde_json::from_str::<ServiceConfig>(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!("Ignoring malformed {}: {}", SETTINGS_FILE, e);
                    ServiceConfig::default()
                }
            },
            Err(_) => ServiceConfig::default(),
        };

        if let Some(v) = non_empty_env(ENV_BROWSERLESS_URL) {
            cfg.browserless_url = Some(v);
        }
        if let Some(v) = non_empty_env(ENV_PROXY_URL) {
            cfg.proxy_url = Some(v);
        }
        if let Some(n) = non_empty_env(ENV_POOL_SIZE).and_then(|v| v.parse::<usize>().ok()) {
            cfg.pool_size = n.max(1);
        }

        cfg
    }

    /// Persist the snapshot under the data directory.
    pub fn save(&self, data_dir: &Path) -> Result<()> {
        let path = data_dir.join(SETTINGS_FILE);
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, raw)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Saved settings snapshot to {}", path.display());
        Ok(())
    }
}

/// Filesystem locations resolved once at startup.
#[derive(Debug, Clone)]
pub struct ServicePaths {
    pub data_dir: PathBuf,
    pub logs_dir: PathBuf,
}

impl ServicePaths {
    pub fn from_env() -> Self {
        Self {
            data_dir: non_empty_env(ENV_DATA_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            logs_dir: non_empty_env(ENV_LOGS_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./logs")),
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("creating {}", self.data_dir.display()))?;
        std::fs::create_dir_all(&self.logs_dir)
            .with_context(|| format!("creating {}", self.logs_dir.display()))?;
        Ok(())
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("crawler.db")
    }
}

/// The live configuration record. Readers get a cheap `Arc` clone; writers
/// swap the whole record so concurrent readers never observe a half-update.
pub struct SharedConfig {
    inner: RwLock<Arc<ServiceConfig>>,
}

impl SharedConfig {
    pub fn new(cfg: ServiceConfig) -> Self {
        Self {
            inner: RwLock::new(Arc::new(cfg)),
        }
    }

    pub fn load(&self) -> Arc<ServiceConfig> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn store(&self, cfg: ServiceConfig) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(cfg);
    }
}

pub fn port_from_env() -> u16 {
    non_empty_env(ENV_PORT)
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

pub fn crawler_api_port_from_env() -> u16 {
    non_empty_env(ENV_CRAWLER_API_PORT)
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_CRAWLER_API_PORT)
}

fn non_empty_env(key: &str) -> Option<String> {
    let v = std::env::var(key).ok()?;
    let v = v.trim();
    if v.is_empty() {
        None
    } else {
        Some(v.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.default_engine, "auto");
        assert!(cfg.browser_stealth);
        assert_eq!(cfg.pool_size, 4);
        assert!(cfg.browserless_url.is_none());
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ServiceConfig {
            browserless_url: Some("ws://browser:3000".to_string()),
            proxy_url: Some("http://proxy:8080".to_string()),
            default_engine: "auto".to_string(),
            browser_stealth: false,
            browser_headless: true,
            pool_size: 2,
        };
        cfg.save(dir.path()).unwrap();

        let loaded = ServiceConfig::load(dir.path());
        assert_eq!(loaded.browserless_url.as_deref(), Some("ws://browser:3000"));
        assert_eq!(loaded.pool_size, 2);
        assert!(!loaded.browser_stealth);
    }

    #[test]
    fn shared_config_swaps_atomically() {
        let shared = SharedConfig::new(ServiceConfig::default());
        let before = shared.load();
        shared.store(ServiceConfig {
            proxy_url: Some("http://proxy:1".to_string()),
            ..ServiceConfig::default()
        });
        let after = shared.load();
        assert!(before.proxy_url.is_none());
        assert_eq!(after.proxy_url.as_deref(), Some("http://proxy:1"));
    }
}
