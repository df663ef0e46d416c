use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use etherspy_core::CommandBuilder;
use etherspy_server::{
    shutdown, Broadcaster, BrokerConfig, BrokerIngest, IngestPipeline, LiveServer,
    LiveServerConfig, ProcessSupervisor, ServiceConfig, SqliteStore, StatisticsCollector,
    StreamDemultiplexer, SupervisorConfig,
};
use etherspy_web::{create_router, AppState};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,etherspy_server=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("EtherSpy starting...");

    let config = ServiceConfig::from_env()?;
    let store = Arc::new(
        SqliteStore::open(&config.db_path, &config.default_settings)
            .await
            .with_context(|| format!("opening database {}", config.db_path.display()))?,
    );

    let stats = Arc::new(StatisticsCollector::new());
    let pipeline = IngestPipeline::new(store.clone(), store.clone(), Broadcaster::new(), stats.clone());
    let (trigger, shutdown) = shutdown::channel();

    // Engine supervisor
    let supervisor = ProcessSupervisor::new(
        CommandBuilder::new(&config.engine),
        store.clone(),
        StreamDemultiplexer::new(pipeline.clone(), config.quiet_patterns.clone()),
        stats.clone(),
        SupervisorConfig::default(),
    );
    let restart = supervisor.restart_handle();
    let supervisor_handle = tokio::spawn(supervisor.run(shutdown.clone()));

    // Broker ingestion
    let broker = BrokerIngest::new(store.clone(), pipeline.clone(), BrokerConfig::default());
    let broker_handle = tokio::spawn(broker.run(shutdown.clone()));

    // Live WebSocket stream
    let ws_listener = TcpListener::bind(config.ws_addr)
        .await
        .with_context(|| format!("binding live stream to {}", config.ws_addr))?;
    let live = LiveServer::new(
        LiveServerConfig {
            bind_addr: config.ws_addr,
            ..LiveServerConfig::default()
        },
        pipeline,
    );
    let ws_shutdown = shutdown.clone();
    let ws_handle = tokio::spawn(async move {
        if let Err(e) = live.run_with_listener(ws_listener, ws_shutdown).await {
            tracing::error!("Live server error: {}", e);
        }
    });

    // HTTP API and dashboard
    let dashboard = config.dashboard_dir.is_dir().then_some(config.dashboard_dir.as_path());
    if dashboard.is_none() {
        tracing::warn!("Dashboard directory {} not found, serving API only", config.dashboard_dir.display());
    }
    let state = AppState {
        records: store.clone(),
        settings: store.clone(),
        aliases: store,
        restart,
        stats,
    };
    let app = create_router(state, dashboard);
    let http_listener = TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("binding HTTP API to {}", config.http_addr))?;
    let http_shutdown = shutdown;
    let http_handle = tokio::spawn(async move {
        if let Err(e) = etherspy_web::serve(http_listener, app, http_shutdown).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tracing::info!("EtherSpy ready");
    tracing::info!("   HTTP API:  http://{}/api/data", config.http_addr);
    tracing::info!("   Live:      ws://{}", config.ws_addr);

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C, shutting down..."),
        Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
    }
    trigger.trigger();

    let all = async {
        let _ = tokio::join!(supervisor_handle, broker_handle, ws_handle, http_handle);
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, all).await.is_err() {
        tracing::warn!("Services did not stop within {:?}", SHUTDOWN_TIMEOUT);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
