use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use task_manager_api::config::Config;
use task_manager_api::db::Database;
use task_manager_api::memory::MemoryStore;
use task_manager_api::scheduler::TranslationScheduler;
use task_manager_api::server::{self, AppState, Stores};
use task_manager_api::translation::GoogleTranslateClient;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (absent in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("task_manager_api=info".parse()?),
        )
        .init();

    info!("Starting task manager API");

    let config = Arc::new(Config::from_env()?);
    info!(
        "Environment: {}, translation target: {}, retranslate on update: {}",
        config.environment, config.translation_target_language, config.retranslate_on_update
    );

    let stores = match &config.database_url {
        Some(url) => Stores::postgres(Database::new(url, config.database_max_connections).await?),
        None if config.is_production() => {
            anyhow::bail!("DATABASE_URL is required when ENVIRONMENT=production");
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory store (data is lost on exit)");
            Stores::memory(MemoryStore::new())
        }
    };

    let provider = GoogleTranslateClient::new(
        config.translation_api_url.clone(),
        config.translation_api_key.clone(),
        config.translation_timeout,
    )
    .context("Failed to build translation client")?;

    let scheduler = TranslationScheduler::start(
        config.scheduler_config(),
        Arc::new(provider),
        Arc::clone(&stores.tasks),
        Arc::clone(&stores.translations),
    );

    let state = AppState::new(Arc::clone(&config), &stores, scheduler.submitter());
    let app = server::router(state);

    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("✓ Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    // Queued translations still run before exit
    scheduler.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
