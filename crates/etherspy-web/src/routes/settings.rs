//! Runtime settings routes.
//!
//! ### `GET /api/settings`
//! The full flat settings map.
//!
//! ### `POST /api/settings`
//! Applies known keys in one transaction, then restarts the engine so the
//! next launch reads them. Unknown keys are ignored.

use axum::extract::{rejection::JsonRejection, State};
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::{ApiError, AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/settings", get(get_settings).post(post_settings))
}

/// GET /api/settings
async fn get_settings(State(state): State<AppState>) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    Ok(Json(state.settings.load_settings().await?.into_map()))
}

/// POST /api/settings
async fn post_settings(
    State(state): State<AppState>,
    body: Result<Json<BTreeMap<String, Value>>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let updates: BTreeMap<String, String> = body
        .into_iter()
        .map(|(key, value)| (key, setting_text(value)))
        .collect();

    let updated = state.settings.update_settings(&updates).await?;
    info!("Updated {} settings", updated);
    if !state.restart.request_restart().await {
        debug!("No engine running, new settings apply at next launch");
    }

    Ok(Json(json!({ "status": "success" })))
}

/// Settings are stored as text; the dashboard sends numbers and booleans
/// for some keys.
fn setting_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        Value::Bool(b) => if b { "1" } else { "0" }.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::create_router;
    use crate::routes::test_support::{get, post_json, send, state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use etherspy_server::{InMemoryStore, SettingsStore};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_get_settings() {
        let app = create_router(state(Arc::new(InMemoryStore::new())), None);
        let (status, body) = send(app, get("/api/settings")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sdr_freq"], "433.92M");
        assert_eq!(body["mqtt_topic"], "rtl_433[/model][/id]");
    }

    #[tokio::test]
    async fn test_post_settings_updates_known_keys() {
        let store = Arc::new(InMemoryStore::new());
        let app = create_router(state(store.clone()), None);

        let (status, body) = send(
            app,
            post_json(
                "/api/settings",
                json!({"sdr_freq": "868M", "sdr_gain": 42, "sdr_celsius": false, "bogus": "x"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "success"}));

        let settings = store.load_settings().await.unwrap();
        assert_eq!(settings.frequency(), "868M");
        assert_eq!(settings.gain(), "42");
        assert!(!settings.celsius_conversion());
        assert!(!settings.contains_key("bogus"));
    }

    #[tokio::test]
    async fn test_post_settings_rejects_non_object() {
        let app = create_router(state(Arc::new(InMemoryStore::new())), None);
        let (status, body) = send(app.clone(), post_json("/api/settings", json!(["sdr_freq"]))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let request = Request::post("/api/settings")
            .header("content-type", "application/json")
            .body(Body::from("sdr_freq=868M"))
            .unwrap();
        let (status, body) = send(app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[test]
    fn test_setting_text() {
        assert_eq!(setting_text(json!("auto")), "auto");
        assert_eq!(setting_text(json!(1883)), "1883");
        assert_eq!(setting_text(json!(true)), "1");
        assert_eq!(setting_text(Value::Null), "");
    }
}
