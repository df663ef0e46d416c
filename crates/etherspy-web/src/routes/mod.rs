//! HTTP route handlers.
//!
//! All API routes live under `/api`; anything else falls through to the
//! static dashboard directory when one is configured.

pub mod aliases;
pub mod data;
pub mod settings;

use axum::Router;
use std::path::Path;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};

use crate::AppState;

/// Create the main Axum router with all routes.
pub fn create_router(state: AppState, dashboard_dir: Option<&Path>) -> Router {
    let api = Router::new()
        .merge(data::routes())
        .merge(settings::routes())
        .merge(aliases::routes());

    let router = Router::new().nest("/api", api).with_state(state);

    let router = match dashboard_dir {
        Some(dir) => {
            let index = ServeFile::new(dir.join("index.html"));
            router.fallback_service(ServeDir::new(dir).fallback(index))
        }
        None => router,
    };

    router.layer(CorsLayer::permissive())
}


#[cfg(test)]
mod tests {
    use super::test_support::{get, send, state};
    use super::*;
    use axum::http::StatusCode;
    use etherspy_server::InMemoryStore;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tower::ServiceExt;

    #[tokio::test]
    async fn test_dashboard_fallback() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>EtherSpy</h1>").unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();
        let app = create_router(state(Arc::new(InMemoryStore::new())), Some(dir.path()));

        let response = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(get("/app.js")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let (status, _) = send(app, get("/api/stats")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_without_dashboard() {
        let app = create_router(state(Arc::new(InMemoryStore::new())), None);
        let response = app.oneshot(get("/index.html")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
