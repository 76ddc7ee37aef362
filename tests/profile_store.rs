//! File-backed profile store checks: WAL journaling, persistence across
//! reopen, and concurrent writers.

use ghostfetch::profiles::{ProfileInput, ProfileStore};
use ghostfetch::EngineKind;

fn browser_input() -> ProfileInput {
    ProfileInput {
        engine: EngineKind::Browser,
        render_js: true,
        render_delay_ms: 2000,
        use_proxy: false,
        preset: None,
        last_status_code: Some(200),
    }
}

#[tokio::test]
async fn profiles_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crawler.db");

    {
        let store = ProfileStore::open(&db_path).await.unwrap();
        store.upsert("news.example.com", &browser_input()).await.unwrap();
    }

    let store = ProfileStore::open(&db_path).await.unwrap();
    let profile = store.get("news.example.com").await.unwrap().unwrap();
    assert_eq!(profile.engine, EngineKind::Browser);
    assert_eq!(profile.render_delay_ms, 2000);
}

#[tokio::test]
async fn wal_mode_is_active() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("crawler.db");
    let store = ProfileStore::open(&db_path).await.unwrap();
    store.upsert("example.com", &browser_input()).await.unwrap();

    // WAL journaling leaves its side file next to the database.
    let wal = dir.path().join("crawler.db-wal");
    assert!(wal.exists(), "expected {} to exist", wal.display());
}

#[tokio::test]
async fn concurrent_upserts_settle_on_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let store = ProfileStore::open(&dir.path().join("crawler.db")).await.unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.upsert("busy.example.com", &browser_input()).await })
        })
        .collect();

    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let profiles = store.all().await.unwrap();
    assert_eq!(profiles.len(), 1);
    assert_eq!(profiles[0].hit_count, 8, "each conflicting upsert bumps the count");
}
