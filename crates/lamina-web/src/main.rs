//! Lamina acquisition server.
//!
//! Run with: cargo run -p lamina-web

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use lamina_acquisition::download::Downloader;
use lamina_acquisition::orchestrator::Orchestrator;
use lamina_acquisition::progress::ProgressBus;
use lamina_acquisition::registry::JobRegistry;
use lamina_acquisition::sources::AdapterRegistry;
use lamina_acquisition::storage::StorageLayout;
use lamina_acquisition::translate::Translator;
use lamina_common::config::Config;
use lamina_common::net::ConfinedClient;
use lamina_web::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::load()?;
    info!(root = %config.storage.root, "starting lamina acquisition server");

    let client = ConfinedClient::new()?;
    let storage = Arc::new(StorageLayout::new(&config.storage.root)?);
    let registry = Arc::new(JobRegistry::new(storage.clone()));
    let adapters = Arc::new(AdapterRegistry::from_config(&config.sources, &client));
    let downloader = Arc::new(Downloader::new(client.clone(), config.download.clone()));
    let translator = Translator::from_config(&client, &config.translate).map(Arc::new);
    if translator.is_none() {
        info!("no translation endpoint configured; translate jobs will warn and skip");
    }
    let bus = Arc::new(ProgressBus::new());

    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        storage.clone(),
        adapters,
        downloader,
        translator,
        bus.clone(),
        &config,
    ));

    // Pick interrupted jobs back up before accepting new ones.
    let resumed = orchestrator.resume_recovered().await?;
    if resumed > 0 {
        info!(resumed, "rescheduled interrupted jobs");
    }

    let state = Arc::new(AppState {
        registry,
        orchestrator,
        storage,
        bus,
    });
    let app = lamina_web::router::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!("listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;

    Ok(())
}
