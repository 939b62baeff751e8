use clap::Parser;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use varstore::{
    Config, VariantStorageManager,
    catalog::{CatalogSeed, MemoryCatalog},
    handlers::{AppState, create_router},
    storage::{EngineRegistry, MemoryEngine},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let catalog = match &config.catalog {
        Some(path) => MemoryCatalog::from_path(path)?,
        None => {
            tracing::warn!("no catalog given, starting with an empty one");
            MemoryCatalog::new(CatalogSeed::default())
        }
    };
    let registry = EngineRegistry::new().with_engine(Arc::new(MemoryEngine::new()));
    let manager = VariantStorageManager::new(
        Arc::new(catalog),
        registry,
        config.storage_configuration(),
    );

    let state = AppState {
        manager: Arc::new(manager),
    };

    let app = create_router(state).layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let app = if config.cors {
        app.layer(CorsLayer::permissive())
    } else {
        app
    };

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Starting varstore server on {}", addr);
    tracing::info!("Artifact directory: {:?}", config.out_dir);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
