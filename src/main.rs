use std::sync::Arc;

use tracing::{info, warn};

use ghostfetch::core::config;
use ghostfetch::engines::pool_settings;
use ghostfetch::{api, AppState, ServicePaths};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,tower_http=warn"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting ghostfetch");

    let paths = ServicePaths::from_env();
    let state = Arc::new(AppState::initialize(paths).await?);
    state.events.info("service starting");

    // Warm the browser pool eagerly when an endpoint is configured. A cold
    // pool is not fatal: slots reconnect lazily on first use.
    let cfg = state.config.load();
    if let Ok(settings) = pool_settings(&cfg) {
        match state.pool.connect(&settings).await {
            Ok(()) => info!("Browser pool warmed ({} slots)", state.pool.size()),
            Err(e) => warn!("Browser pool warm-up failed: {}. Slots will retry on demand.", e),
        }
    } else {
        info!("No remote browser endpoint configured; browser/unblock engines disabled");
    }

    let port = config::port_from_env();
    let api_port = config::crawler_api_port_from_env();

    let main_listener = bind(port).await?;
    info!("Main API listening on http://0.0.0.0:{}", port);

    let shutdown_state = state.clone();

    if api_port != port {
        // The crawler API gets its own listener so embedders can firewall
        // the two surfaces independently. Same router on both.
        let api_listener = bind(api_port).await?;
        info!("Crawler API listening on http://0.0.0.0:{}", api_port);

        let crawler_app = api::router(state.clone());
        tokio::spawn(async move {
            if let Err(e) = axum::serve(api_listener, crawler_app).await {
                warn!("Crawler API server exited: {}", e);
            }
        });
    }

    axum::serve(main_listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown_state))
        .await?;

    Ok(())
}

async fn bind(port: u16) -> anyhow::Result<tokio::net::TcpListener> {
    let addr = format!("0.0.0.0:{}", port);
    match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Address already in use: {}. Stop the existing process or set PORT/CRAWLER_API_PORT.",
                addr
            )
        }
        Err(e) => Err(e.into()),
    }
}

async fn shutdown_signal(state: Arc<AppState>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).ok();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = async {
                if let Some(ref mut s) = sigterm {
                    s.recv().await;
                } else {
                    futures::future::pending::<()>().await;
                }
            } => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    info!("Shutdown signal received; draining and disconnecting browser pool");
    state.events.info("service shutting down");
    state.begin_drain();
    state.pool.disconnect().await;
}
