mod config;
mod handlers;
mod router;
mod state;

use std::sync::Arc;

use config::GatewayConfig;
use portfolio_engine::collectors::Simulator;
use portfolio_engine::config::{EngineConfig, PortfolioFile};
use portfolio_engine::daily_close::DailyCloseTask;
use portfolio_engine::events::EventType;
use portfolio_engine::history::History;
use portfolio_engine::hub::BroadcastHub;
use portfolio_engine::portfolio::Portfolio;
use portfolio_engine::status::StatusReporter;
use portfolio_engine::storage::{JsonlStore, MemoryStore, Storage};
use portfolio_engine::supervisor::Supervisor;
use portfolio_engine::task::Task;
use router::create_router;
use state::AppState;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(version = portfolio_engine::SERVICE_VERSION, "Starting gateway");

    let config = GatewayConfig::from_env()?;
    let engine = EngineConfig::default();

    let storage: Arc<dyn Storage> = match &config.data_dir {
        Some(dir) => Arc::new(JsonlStore::open(dir).await?),
        None => Arc::new(MemoryStore::new()),
    };
    let positions = match &config.portfolio {
        Some(path) => PortfolioFile::load(path)?.positions,
        None => {
            tracing::warn!("STONKS_PORTFOLIO not set, starting with an empty portfolio");
            Vec::new()
        }
    };

    let history = Arc::new(History::new(&engine.history, engine.timezone, storage.clone()));
    history.restore().await;

    let portfolio = Arc::new(Portfolio::new(positions, engine.portfolio.clone(), history.clone())?);
    let daily_close = DailyCloseTask::new(&portfolio, storage.clone(), &engine.daily_close, engine.timezone);
    let status = Arc::new(StatusReporter::new(engine.status_interval));

    let hub = Arc::new(BroadcastHub::new(portfolio.clone(), engine.hub.clone()));
    hub.attach();
    status.on(EventType::Status, hub.clone());

    let mut producers: Vec<Arc<dyn Task>> = Vec::new();
    if config.simulate {
        producers.push(Arc::new(Simulator::new(portfolio.clone(), engine.simulator.clone())));
    }
    let services: Vec<Arc<dyn Task>> = vec![portfolio, history, daily_close, status.clone()];

    let mut handles: Vec<JoinHandle<()>> = Vec::new();
    for task in producers.iter().chain(services.iter()) {
        status.track(task.clone());
        handles.push(Supervisor::new(task.clone(), &engine.supervisor).spawn());
    }

    let app = create_router(AppState::new(hub));
    let listener = TcpListener::bind(config.bind).await?;
    tracing::info!("Listening on {}", config.bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    shutdown(&producers, &services, storage.as_ref(), handles).await;
    Ok(())
}

/// Stop feeds before the engine, release storage, then reap what is left.
async fn shutdown(
    producers: &[Arc<dyn Task>],
    services: &[Arc<dyn Task>],
    storage: &dyn Storage,
    handles: Vec<JoinHandle<()>>,
) {
    tracing::info!("Shutting down");
    for task in producers.iter().chain(services.iter()) {
        task.stop().await;
    }
    if let Err(err) = storage.close().await {
        tracing::warn!(error = %err, "Failed to close storage");
    }
    for handle in &handles {
        handle.abort();
    }
    for handle in handles {
        match handle.await {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {}
            Err(err) => tracing::error!(error = %err, "Supervised task ended abnormally"),
        }
    }
    tracing::info!("Shutdown complete");
}
