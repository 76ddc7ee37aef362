//! Domain profile store: the persisted `domain -> winning config` mapping
//! that turns expensive online probing into O(1) routing.
//!
//! Single SQLite file under the data directory, WAL journaling so admin
//! reads never block fetch-path writes.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::info;

use crate::core::types::{DomainProfile, EngineKind};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS domain_profiles (
    domain            TEXT PRIMARY KEY,
    engine            TEXT NOT NULL,
    render_js         INTEGER NOT NULL DEFAULT 0,
    render_delay_ms   INTEGER NOT NULL DEFAULT 0,
    use_proxy         INTEGER NOT NULL DEFAULT 0,
    preset            TEXT,
    hit_count         INTEGER NOT NULL DEFAULT 1,
    last_status_code  INTEGER,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
)";

/// Config fields of a winning escalation step, as written to the store.
#[derive(Debug, Clone)]
pub struct ProfileInput {
    pub engine: EngineKind,
    pub render_js: bool,
    pub render_delay_ms: u64,
    pub use_proxy: bool,
    pub preset: Option<String>,
    pub last_status_code: Option<u16>,
}

#[derive(Clone)]
pub struct ProfileStore {
    pool: SqlitePool,
}

impl ProfileStore {
    /// Open (creating if missing) the profile database and enable WAL mode.
    pub async fn open(db_path: &std::path::Path) -> Result<Self> {
        let conn_str = format!("sqlite:{}?mode=rwc", db_path.display());
        let pool = SqlitePool::connect(&conn_str)
            .await
            .with_context(|| format!("opening profile store at {}", db_path.display()))?;

        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&pool)
            .await
            .context("enabling WAL mode")?;

        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .context("creating domain_profiles table")?;

        info!("Profile store ready at {}", db_path.display());
        Ok(Self { pool })
    }

    /// Ephemeral store for tests.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:").await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn get(&self, domain: &str) -> Result<Option<DomainProfile>> {
        let row = sqlx::query("SELECT * FROM domain_profiles WHERE domain = ?")
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_profile).transpose()
    }

    /// Insert on absence; on conflict overwrite the config fields, bump the
    /// hit count, and refresh `updated_at`.
    pub async fn upsert(&self, domain: &str, input: &ProfileInput) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO domain_profiles
                 (domain, engine, render_js, render_delay_ms, use_proxy, preset,
                  hit_count, last_status_code, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?, ?)
             ON CONFLICT(domain) DO UPDATE SET
                 engine = excluded.engine,
                 render_js = excluded.render_js,
                 render_delay_ms = excluded.render_delay_ms,
                 use_proxy = excluded.use_proxy,
                 preset = excluded.preset,
                 hit_count = domain_profiles.hit_count + 1,
                 last_status_code = excluded.last_status_code,
                 updated_at = excluded.updated_at",
        )
        .bind(domain)
        .bind(input.engine.as_str())
        .bind(input.render_js as i64)
        .bind(input.render_delay_ms as i64)
        .bind(input.use_proxy as i64)
        .bind(&input.preset)
        .bind(input.last_status_code.map(|s| s as i64))
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Cache-hit bookkeeping: bump the counter, refresh the timestamp, and
    /// note the latest status when the cached fetch produced one.
    pub async fn increment_hit(&self, domain: &str, last_status_code: Option<u16>) -> Result<()> {
        sqlx::query(
            "UPDATE domain_profiles SET
                 hit_count = hit_count + 1,
                 last_status_code = COALESCE(?, last_status_code),
                 updated_at = ?
             WHERE domain = ?",
        )
        .bind(last_status_code.map(|s| s as i64))
        .bind(Utc::now().to_rfc3339())
        .bind(domain)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Admin eviction. Returns false when no profile existed.
    pub async fn delete(&self, domain: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM domain_profiles WHERE domain = ?")
            .bind(domain)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn all(&self) -> Result<Vec<DomainProfile>> {
        let rows = sqlx::query("SELECT * FROM domain_profiles ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_profile).collect()
    }
}

fn row_to_profile(row: sqlx::sqlite::SqliteRow) -> Result<DomainProfile> {
    let engine_raw: String = row.try_get("engine")?;
    let engine = EngineKind::parse_str(&engine_raw)
        .ok_or_else(|| anyhow!("profile row carries unknown engine '{engine_raw}'"))?;

    Ok(DomainProfile {
        domain: row.try_get("domain")?,
        engine,
        render_js: row.try_get::<i64, _>("render_js")? != 0,
        render_delay_ms: row.try_get::<i64, _>("render_delay_ms")?.max(0) as u64,
        use_proxy: row.try_get::<i64, _>("use_proxy")? != 0,
        preset: row.try_get("preset")?,
        hit_count: row.try_get("hit_count")?,
        last_status_code: row
            .try_get::<Option<i64>, _>("last_status_code")?
            .map(|s| s as u16),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stealth_input() -> ProfileInput {
        ProfileInput {
            engine: EngineKind::Stealth,
            render_js: true,
            render_delay_ms: 3000,
            use_proxy: false,
            preset: None,
            last_status_code: Some(200),
        }
    }

    #[tokio::test]
    async fn get_returns_none_for_unknown_domain() {
        let store = ProfileStore::in_memory().await.unwrap();
        assert!(store.get("example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_inserts_then_overwrites() {
        let store = ProfileStore::in_memory().await.unwrap();
        store.upsert("example.com", &stealth_input()).await.unwrap();

        let profile = store.get("example.com").await.unwrap().unwrap();
        assert_eq!(profile.engine, EngineKind::Stealth);
        assert_eq!(profile.render_delay_ms, 3000);
        assert_eq!(profile.hit_count, 1);

        let mut second = stealth_input();
        second.engine = EngineKind::Browser;
        second.render_delay_ms = 2000;
        store.upsert("example.com", &second).await.unwrap();

        let profile = store.get("example.com").await.unwrap().unwrap();
        assert_eq!(profile.engine, EngineKind::Browser);
        assert_eq!(profile.render_delay_ms, 2000);
        assert_eq!(profile.hit_count, 2, "conflict bumps the hit count");
    }

    #[tokio::test]
    async fn increment_hit_bumps_counter_and_status() {
        let store = ProfileStore::in_memory().await.unwrap();
        store.upsert("example.com", &stealth_input()).await.unwrap();

        store.increment_hit("example.com", Some(503)).await.unwrap();
        let profile = store.get("example.com").await.unwrap().unwrap();
        assert_eq!(profile.hit_count, 2);
        assert_eq!(profile.last_status_code, Some(503));

        // Missing status leaves the previous one in place.
        store.increment_hit("example.com", None).await.unwrap();
        let profile = store.get("example.com").await.unwrap().unwrap();
        assert_eq!(profile.hit_count, 3);
        assert_eq!(profile.last_status_code, Some(503));
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = ProfileStore::in_memory().await.unwrap();
        store.upsert("example.com", &stealth_input()).await.unwrap();
        assert!(store.delete("example.com").await.unwrap());
        assert!(!store.delete("example.com").await.unwrap());
        assert!(store.get("example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn all_lists_every_profile() {
        let store = ProfileStore::in_memory().await.unwrap();
        store.upsert("a.example.com", &stealth_input()).await.unwrap();
        store.upsert("b.example.com", &stealth_input()).await.unwrap();
        let profiles = store.all().await.unwrap();
        assert_eq!(profiles.len(), 2);
    }
}
