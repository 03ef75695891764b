use anyhow::{Context, Result};
use clap::Parser;
use ras_identity_oidc::{Authenticator, InMemorySessionStore, SessionStore};
use ras_oidc_server::{AppState, CookieSettings, ServerConfig, app};
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often expired sessions are swept from memory.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ras_oidc_server=debug,ras_identity_oidc=debug,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables from .env file if present
    dotenvy::dotenv().ok();

    let config = ServerConfig::parse();
    let oidc = config.oidc_config()?;
    info!("Starting OIDC login server for issuer {}", oidc.issuer_url);

    let cookie = CookieSettings::for_config(config.session_cookie_name.clone(), &oidc);
    let authenticator =
        Authenticator::new(oidc).context("Failed to initialize the OIDC authenticator")?;

    // Warm the discovery cache; the first login retries if this fails
    if let Err(err) = authenticator.directory().metadata().await {
        warn!("Provider discovery failed at startup: {}", err);
    }

    let store = Arc::new(
        InMemorySessionStore::new(config.session_ttl_secs).context("SESSION_TTL_SECS is invalid")?,
    );
    spawn_session_cleanup(store.clone());

    let state = AppState::new(authenticator, store, cookie);
    let app = app(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("Server running on http://{}", config.bind_addr);
    info!("OIDC redirect URI: {}", config.redirect_uri);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn spawn_session_cleanup(store: Arc<InMemorySessionStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            match store.cleanup_expired().await {
                Ok(0) => {}
                Ok(removed) => debug!("Removed {} expired sessions", removed),
                Err(err) => warn!("Session cleanup failed: {}", err),
            }
        }
    });
}
