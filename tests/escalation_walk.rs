//! Scheduler behavior against scripted engines: ladder walking, the
//! quality gate, winner persistence, and cache-hit bookkeeping — no network
//! and no live browser required.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use ghostfetch::core::event_log::EventLog;
use ghostfetch::escalation::{
    build_ladder, is_default_win, profile_for_win, walk_ladder,
};
use ghostfetch::profiles::ProfileStore;
use ghostfetch::{EngineKind, FetchError, FetchResult, ResponseType, ServiceConfig};

fn config(proxy: bool, remote: bool) -> ServiceConfig {
    ServiceConfig {
        proxy_url: proxy.then(|| "http://proxy:8080".to_string()),
        browserless_url: remote.then(|| "ws://browser:3000".to_string()),
        ..ServiceConfig::default()
    }
}

fn result(status: u16, content: String, engine_used: &str) -> FetchResult {
    FetchResult {
        status_code: status,
        content,
        markdown: None,
        headers: HashMap::new(),
        url: "http://site/a".to_string(),
        engine_used: engine_used.to_string(),
        response_type: ResponseType::Text,
    }
}

fn article_html(paragraphs: usize, target_len: usize) -> String {
    let mut html = String::from("<html><body>");
    for i in 0..paragraphs {
        html.push_str(&format!(
            "<p>Paragraph {i} carries enough readable text to count as content.</p>"
        ));
    }
    html.push_str("</body></html>");
    while html.len() < target_len {
        html.push_str("<!-- padding -->");
    }
    html
}

fn shell_html(target_len: usize) -> String {
    let mut html =
        String::from(r#"<html><body><div id="root"></div><noscript>js required</noscript>"#);
    while html.len() < target_len {
        html.push_str("<!-- bundle hash -->");
    }
    html.push_str("</body></html>");
    html
}

#[tokio::test]
async fn static_page_wins_on_first_step_and_writes_no_profile() {
    // S1: 1200 bytes of article HTML with 4 <p> tags satisfies the judge on
    // the ladder's first step; a default win must not be persisted.
    let store = ProfileStore::in_memory().await.unwrap();
    let events = EventLog::ephemeral();
    let steps = build_ladder(&config(true, true));

    let calls = AtomicUsize::new(0);
    let win = walk_ladder(
        &steps,
        |index, _step| {
            calls.fetch_add(1, Ordering::SeqCst);
            let body = article_html(4, 1200);
            async move {
                assert_eq!(index, 0, "only the first step should run");
                Ok(result(200, body, "fast:proxy"))
            }
        },
        &events,
    )
    .await
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(win.index, 0);
    assert!(is_default_win(win.index, &win.step));

    // Scheduler contract: default winners never reach the store.
    assert!(store.get("site").await.unwrap().is_none());
}

#[tokio::test]
async fn spa_shell_escalates_to_browser_and_persists() {
    // S2: the fast lane returns an unhydrated shell; the remote browser
    // renders 7 KB and wins; the profile records engine=browser.
    let store = ProfileStore::in_memory().await.unwrap();
    let events = EventLog::ephemeral();
    let steps = build_ladder(&config(false, true));
    assert_eq!(steps[0].label, "fast+direct");
    assert_eq!(steps[1].label, "browser+2s");

    let win = walk_ladder(
        &steps,
        |index, _step| async move {
            match index {
                0 => Ok(result(
                    200,
                    r#"<html><body><div id="root"></div></body></html>"#.to_string(),
                    "fast:direct",
                )),
                1 => Ok(result(200, article_html(12, 7000), "browser:pool")),
                _ => panic!("walk went past the winning step"),
            }
        },
        &events,
    )
    .await
    .unwrap();

    assert_eq!(win.index, 1);
    assert_eq!(win.step.engine, EngineKind::Browser);
    assert!(!is_default_win(win.index, &win.step));

    store
        .upsert("site", &profile_for_win(&win.step, &win.result, None))
        .await
        .unwrap();

    let profile = store.get("site").await.unwrap().unwrap();
    assert_eq!(profile.engine, EngineKind::Browser);
    assert_eq!(profile.render_delay_ms, 2000);
    assert_eq!(profile.hit_count, 1);
}

#[tokio::test]
async fn blocked_fast_lane_falls_through_to_stealth() {
    // S3 shape: 403 challenge pages from the fast steps, a thin shell from
    // the remote browser, then stealth at 3 s delivers a full page. The
    // persisted step carries renderDelayMs=3000.
    let store = ProfileStore::in_memory().await.unwrap();
    let events = EventLog::ephemeral();
    let steps = build_ladder(&config(true, true));

    let win = walk_ladder(
        &steps,
        |index, step| async move {
            match step.label {
                "fast+proxy" | "fast+direct" => {
                    Ok(result(403, article_html(2, 600), "fast:proxy"))
                }
                "browser+2s" => Ok(result(200, shell_html(1500), "browser:pool")),
                "stealth+3s" => Ok(result(200, article_html(30, 15_000), "stealth:local")),
                other => panic!("unexpected step {other} at index {index}"),
            }
        },
        &events,
    )
    .await
    .unwrap();

    assert_eq!(win.step.label, "stealth+3s");
    assert_eq!(win.step.engine, EngineKind::Stealth);
    assert_eq!(win.step.render_delay_ms, 3000);

    store
        .upsert(
            "site",
            &profile_for_win(&win.step, &win.result, Some("chrome")),
        )
        .await
        .unwrap();

    let profile = store.get("site").await.unwrap().unwrap();
    assert_eq!(profile.engine, EngineKind::Stealth);
    assert_eq!(profile.render_delay_ms, 3000);
    assert_eq!(profile.preset.as_deref(), Some("chrome"));
    assert_eq!(profile.last_status_code, Some(200));
}

#[tokio::test]
async fn step_errors_count_as_insufficient_and_continue() {
    let events = EventLog::ephemeral();
    let steps = build_ladder(&config(false, false));
    assert_eq!(steps.len(), 2, "fast+direct and stealth+3s only");

    let win = walk_ladder(
        &steps,
        |index, _step| async move {
            match index {
                0 => Err(FetchError::Engine(anyhow::anyhow!("connection reset"))),
                1 => Ok(result(200, article_html(10, 6000), "stealth:local")),
                _ => unreachable!(),
            }
        },
        &events,
    )
    .await
    .unwrap();

    assert_eq!(win.index, 1);
}

#[tokio::test]
async fn exhausted_ladder_reports_as_such() {
    let events = EventLog::ephemeral();
    let steps = build_ladder(&config(true, true));
    let attempts = AtomicUsize::new(0);

    let outcome = walk_ladder(
        &steps,
        |_, _| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Ok(result(503, "maintenance".to_string(), "fast:proxy")) }
        },
        &events,
    )
    .await;

    assert!(matches!(outcome, Err(FetchError::ExhaustedEscalation)));
    assert_eq!(
        attempts.load(Ordering::SeqCst),
        steps.len(),
        "every rung must be tried before giving up"
    );
}

#[tokio::test]
async fn cancellation_aborts_the_walk_immediately() {
    // Unlike ordinary step failures, Cancelled is not absorbed: the walk
    // stops where it stands, so no later step runs and no winner (hence no
    // profile write) can come out of it.
    let events = EventLog::ephemeral();
    let steps = build_ladder(&config(true, true));
    let attempts = AtomicUsize::new(0);

    let outcome = walk_ladder(
        &steps,
        |index, _step| {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                match index {
                    0 => Ok(result(403, "blocked".repeat(100), "fast:proxy")),
                    _ => Err(FetchError::Cancelled),
                }
            }
        },
        &events,
    )
    .await;

    assert!(matches!(outcome, Err(FetchError::Cancelled)));
    assert_eq!(
        attempts.load(Ordering::SeqCst),
        2,
        "the walk must stop at the cancelled step"
    );
}

#[tokio::test]
async fn cached_reuse_increments_hit_count() {
    // S5 bookkeeping: after a stealth win, a second fetch goes straight to
    // the cached step and bumps hitCount 1 -> 2.
    let store = ProfileStore::in_memory().await.unwrap();
    let events = EventLog::ephemeral();
    let steps = build_ladder(&config(true, true));

    let win = walk_ladder(
        &steps,
        |_, step| async move {
            if step.engine == EngineKind::Stealth {
                Ok(result(200, article_html(30, 15_000), "stealth:local"))
            } else {
                Ok(result(403, "blocked".repeat(100), "fast:proxy"))
            }
        },
        &events,
    )
    .await
    .unwrap();

    store
        .upsert("site", &profile_for_win(&win.step, &win.result, None))
        .await
        .unwrap();
    assert_eq!(store.get("site").await.unwrap().unwrap().hit_count, 1);

    store.increment_hit("site", Some(200)).await.unwrap();
    let profile = store.get("site").await.unwrap().unwrap();
    assert_eq!(profile.hit_count, 2);
    assert_eq!(profile.engine, EngineKind::Stealth);
}
