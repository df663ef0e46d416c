//! # etherspy-web
//!
//! REST API and dashboard serving for EtherSpy.
//!
//! ## Routes
//!
//! - `GET /api/data` - Latest Snapshot
//! - `GET|POST /api/settings` - runtime settings; a POST restarts the engine
//! - `GET|POST /api/aliases` - sensor display names
//! - `GET /api/stats` - ingestion counters
//! - `GET /api/status` - supervisor state
//! - everything else - static dashboard files
//!
//! ## Usage
//!
//! ```rust,ignore
//! use etherspy_web::{create_router, AppState};
//!
//! let app = create_router(state, Some(Path::new("dashboard")));
//! etherspy_web::serve(listener, app, shutdown).await?;
//! ```

pub mod error;
pub mod routes;

pub use error::ApiError;
pub use routes::create_router;

use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use etherspy_server::{
    AliasStore, RestartHandle, SettingsStore, Shutdown, StatisticsCollector, TelemetryStore,
};

/// Shared state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub records: Arc<dyn TelemetryStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub aliases: Arc<dyn AliasStore>,
    /// Restart coordinator, invoked after every settings update.
    pub restart: RestartHandle,
    pub stats: Arc<StatisticsCollector>,
}

/// Serve `app` until shutdown.
pub async fn serve(listener: TcpListener, app: axum::Router, mut shutdown: Shutdown) -> anyhow::Result<()> {
    info!("HTTP server listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;
    info!("HTTP server stopped");
    Ok(())
}
