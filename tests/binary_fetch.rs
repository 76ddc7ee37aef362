//! Binary (base64) fetches through the real HTTP surface: the fast engine
//! must serve them even when a cached profile points at a heavier engine.
//! Fixture content is served from a local listener, so no outside network
//! or browser is involved.

use std::sync::Arc;

use axum::http::header;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use base64::Engine as _;
use ghostfetch::profiles::ProfileInput;
use ghostfetch::{api, AppState, EngineKind, ServicePaths};

const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01,
];

fn article_html() -> String {
    let mut html = String::from("<html><body>");
    for i in 0..4 {
        html.push_str(&format!(
            "<p>Paragraph {i} carries enough readable text to count as real content.</p>"
        ));
    }
    html.push_str("</body></html>");
    while html.len() < 1200 {
        html.push_str("<!-- padding -->");
    }
    html
}

/// Local origin serving one binary and one article page.
async fn spawn_fixture() -> String {
    let app = Router::new()
        .route(
            "/x.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], PNG_BYTES.to_vec()) }),
        )
        .route("/article", get(|| async { Html(article_html()) }));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Full service wired against temp dirs, listening on an ephemeral port.
/// Ambient proxy/browser endpoints are cleared so the ladder shape is
/// deterministic regardless of the host environment.
async fn spawn_service() -> (Arc<AppState>, String, tempfile::TempDir) {
    std::env::remove_var("PROXY_URL");
    std::env::remove_var("BROWSERLESS_URL");

    let dir = tempfile::tempdir().unwrap();
    let paths = ServicePaths {
        data_dir: dir.path().join("data"),
        logs_dir: dir.path().join("logs"),
    };
    let state = Arc::new(AppState::initialize(paths).await.unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = api::router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (state, format!("http://{addr}"), dir)
}

#[tokio::test]
async fn base64_fetch_forces_fast_engine_past_cached_profile() {
    let fixture = spawn_fixture().await;
    let (state, service, _dir) = spawn_service().await;

    // Pin a stealth profile for the fixture host. A base64 fetch must route
    // around it — a stealth launch here would fail (and be wrong anyway).
    state
        .profiles
        .upsert(
            "127.0.0.1",
            &ProfileInput {
                engine: EngineKind::Stealth,
                render_js: true,
                render_delay_ms: 3000,
                use_proxy: false,
                preset: None,
                last_status_code: Some(200),
            },
        )
        .await
        .unwrap();

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{service}/api/fetch"))
        .json(&serde_json::json!({
            "url": format!("{fixture}/x.png"),
            "responseType": "base64",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true, "unexpected response: {body}");
    assert_eq!(body["statusCode"], 200);
    assert_eq!(body["engineUsed"], "fast:direct");
    assert_eq!(body["responseType"], "base64");

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(body["content"].as_str().unwrap())
        .unwrap();
    assert_eq!(decoded.len(), PNG_BYTES.len(), "decoded length must match the file size");
    assert_eq!(decoded, PNG_BYTES);

    // The pinned profile saw no traffic: no hit recorded, config untouched.
    let profile = state.profiles.get("127.0.0.1").await.unwrap().unwrap();
    assert_eq!(profile.hit_count, 1);
    assert_eq!(profile.engine, EngineKind::Stealth);
}

#[tokio::test]
async fn auto_fetch_of_static_article_uses_fast_direct_and_writes_no_profile() {
    let fixture = spawn_fixture().await;
    let (state, service, _dir) = spawn_service().await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("{service}/api/fetch"))
        .json(&serde_json::json!({ "url": format!("{fixture}/article") }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["success"], true, "unexpected response: {body}");
    assert_eq!(body["engineUsed"], "fast:direct");
    assert!(body["content"].as_str().unwrap().contains("<p>"));

    // First-step fast win is the implicit default: nothing persisted.
    assert!(state.profiles.get("127.0.0.1").await.unwrap().is_none());
}
