//! Étude - learning assistant API
//!
//! Serves the chat endpoint: streaming, tool-augmented conversations over
//! hosted LLM providers, with history and memories in a hosted row store.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use etude_ai::config::Config;
use etude_ai::core::ChatOrchestrator;
use etude_ai::providers::ProviderSet;
use etude_ai::routes;
use etude_ai::store::{AuthClient, InMemoryStore, MemoryStore, RestStore};
use etude_ai::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "etude_ai=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    let memories: Arc<dyn MemoryStore> = match RestStore::from_config(&config) {
        Some(store) => Arc::new(store),
        None => {
            tracing::warn!("no row-store credentials configured, state will not survive restarts");
            Arc::new(InMemoryStore::new())
        }
    };

    let providers = ProviderSet::from_config(&config);
    match &providers {
        Some(set) => tracing::info!(
            primary = set.primary.name(),
            fallback = set.fallback.as_ref().map(|p| p.name()),
            "inference providers ready"
        ),
        None => tracing::warn!("no provider credential configured, chat requests will fail"),
    }

    let orchestrator = Arc::new(ChatOrchestrator::new(
        providers,
        memories,
        config.production(),
    ));
    let auth = AuthClient::from_config(&config).map(Arc::new);

    let state = AppState {
        config,
        orchestrator,
        auth,
    };

    let app = Router::new()
        .merge(routes::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!("📚 Étude API running at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
