//! Standalone image lookup.
//!
//! POST /api/image-search takes a free-text query and returns keyword-matched
//! manual images without running a chat turn. Used by the widget's image
//! gallery and as a cheap preview while an answer streams.

use axum::{extract::Extension, http::StatusCode, Json};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::warn;

use crate::app::AppState;

#[derive(Debug, Deserialize)]
pub struct ImageSearchBody {
    pub query: String,
}

/// POST /api/image-search
pub async fn image_search_handler(
    Extension(state): Extension<AppState>,
    Json(body): Json<ImageSearchBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let query = body.query.trim();
    if query.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "query must not be empty" })),
        ));
    }

    let mut images = state.suggestions.suggest(query, "");
    // No keyword hit means anything returned is the configured default.
    let fallback = !state.suggestions.matches(query);

    // Drop suggestions whose asset is no longer in the bucket. A listing
    // failure skips the check rather than failing the request.
    match state.inventory.entries(Utc::now()).await {
        Ok(entries) => {
            images.retain(|image| {
                let name = image.url.rsplit('/').next().unwrap_or(&image.url);
                entries.iter().any(|entry| entry.name == name)
            });
        }
        Err(err) => warn!(error = %err, "image inventory unavailable"),
    }

    Ok(Json(json!({ "images": images, "fallback": fallback })))
}
