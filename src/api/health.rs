use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;
use serde_json::{json, Value};

use crate::config::CredentialsConfig;
use crate::state::AppState;

/// Health check handler.
/// Returns JSON with status and a config summary that carries no secrets.
pub fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let config = &state.config;
    let credential_kind = match config.credentials {
        CredentialsConfig::Static { .. } => "static",
        CredentialsConfig::OAuth { .. } => "oauth",
    };
    Json(json!({
        "status": "gemini-bridge-rs is running",
        "config": {
            "models_count": config.models.len(),
            "client_keys_count": config.client_authentication.allowed_keys.len(),
            "credentials": credential_kind,
            "fallback_enabled": config.fallback.enabled,
            "thinking": {
                "real": config.thinking.real,
                "delivery": config.thinking.delivery.to_string(),
                "synthetic": config.thinking.synthetic_active(),
            },
            "log_level": config.features.log_level,
        }
    }))
}
