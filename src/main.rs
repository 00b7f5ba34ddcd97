//! Main entry point for the image generation job engine

use gen_fanout_engine::{
    api,
    backend::{AdapterSet, EnvCredentials, ModelRegistry, OpenAiCompatibleAdapter},
    config::Settings,
    response::{FileImageStore, ImageStore, MemoryImageStore},
    store::MemoryDocumentStore,
    AppState, Collaborators,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    init_tracing(&settings);

    info!(
        "Loaded configuration: server={}:{}",
        settings.server.host, settings.server.port
    );

    let registry = ModelRegistry::from_config(&settings.models)?;
    info!(models = registry.len(), "Model registry ready");

    let timeout = Duration::from_secs(settings.dispatch.provider_timeout_secs);
    let compatible = Arc::new(OpenAiCompatibleAdapter::new(timeout)?);
    let adapters = AdapterSet::new(compatible);

    let images: Arc<dyn ImageStore> = match settings.storage.image_backend.as_str() {
        "memory" => Arc::new(MemoryImageStore::new(settings.storage.url_prefix.clone())),
        _ => Arc::new(FileImageStore::from_config(&settings.storage)),
    };

    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    let state = Arc::new(AppState::build(
        settings,
        registry,
        Collaborators {
            documents: Arc::new(MemoryDocumentStore::new()),
            images,
            adapters,
            credentials: Arc::new(EnvCredentials),
        },
    ));

    let app = api::create_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.coordinator.shutdown().await;
    info!("Server stopped");
    Ok(())
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    let registry = tracing_subscriber::registry().with(filter);
    if settings.logging.format == "pretty" {
        registry.with(fmt::layer()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    info!("Shutdown signal received");
}
