//! Sensor alias routes.
//!
//! ### `GET /api/aliases`
//! `{sensor_id: alias}` for every aliased source.
//!
//! ### `POST /api/aliases`
//! `{"sensor_id": ..., "alias": ...}` sets an alias; an empty or missing
//! alias removes it.

use axum::extract::{rejection::JsonRejection, State};
use axum::{response::Json, routing::get, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::{ApiError, AppState};

/// Body of `POST /api/aliases`.
#[derive(Debug, Deserialize)]
pub struct AliasUpdate {
    /// Sent as a string or a number.
    #[serde(default)]
    pub sensor_id: Value,
    #[serde(default)]
    pub alias: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/aliases", get(get_aliases).post(post_alias))
}

/// GET /api/aliases
async fn get_aliases(State(state): State<AppState>) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    Ok(Json(state.aliases.aliases().await?))
}

/// POST /api/aliases
async fn post_alias(
    State(state): State<AppState>,
    update: Result<Json<AliasUpdate>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(update) = update?;
    let sensor_id = match update.sensor_id {
        Value::String(s) if !s.is_empty() => s,
        Value::Number(n) => n.to_string(),
        _ => return Err(ApiError::BadRequest("sensor_id is required".to_string())),
    };

    state
        .aliases
        .set_alias(&sensor_id, update.alias.as_deref())
        .await?;
    Ok(Json(json!({ "status": "success" })))
}
