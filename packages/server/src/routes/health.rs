//! Health check endpoint.

use axum::Json;
use serde_json::{json, Value};

/// GET /health
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "support-chat-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
