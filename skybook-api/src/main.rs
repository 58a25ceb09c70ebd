use anyhow::Context;
use skybook_api::{
    app,
    state::{AppState, AuthConfig, SessionRegistry},
};
use skybook_core::SystemClock;
use skybook_gate::{NavigationGate, RouteTable};
use skybook_store::{HttpBookingBackend, SessionStores};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skybook_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = skybook_store::app_config::Config::load().context("Failed to load config")?;
    tracing::info!("Starting SkyBook API on port {}", config.server.port);

    let backend = HttpBookingBackend::new(&config.backend.base_url, Duration::from_secs(config.backend.timeout_seconds))
        .context("Failed to build booking backend client")?;
    tracing::info!("Booking backend at {}", config.backend.base_url);

    match &config.redis.url {
        Some(_) => tracing::info!("Persisting booking sessions to Redis under '{}'", config.redis.namespace),
        None => tracing::warn!("No redis.url configured, booking sessions live in memory only"),
    }

    let stores = SessionStores::new(&config.redis).context("Failed to open session storage")?;
    let sessions = SessionRegistry::new(
        stores,
        config.session_policy(),
        config.fare_policy(),
        Arc::new(SystemClock),
    );

    let app_state = AppState {
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
        backend: Arc::new(backend),
        gate: Arc::new(NavigationGate::new(config.gate_paths(), RouteTable::standard())),
        sessions,
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
