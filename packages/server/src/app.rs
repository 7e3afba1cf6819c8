//! Application setup and router construction.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::{header::CONTENT_TYPE, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use chrono::Duration;
use image_refs::{Extractor, ExtractorConfig, KeywordRule, SuggestionConfig, SuggestionEngine};
use llm_client::LlmClient;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::Config;
use crate::inventory::{CachedInventory, ImageInventory, StorageInventory};
use crate::prompts::IMAGE_MARKER;
use crate::routes::{
    chat_complete_handler, chat_stream_handler, health_handler, image_search_handler,
};
use crate::search::{ManualSearch, RpcManualSearch};

/// How long a bucket listing stays fresh.
const INVENTORY_TTL_MINUTES: i64 = 10;

const DEFAULT_SUGGESTION_ASSET: &str = "galaxy_s25_interface.jpg";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub llm: Arc<LlmClient>,
    pub search: Arc<dyn ManualSearch>,
    pub extractor: Arc<Extractor>,
    pub suggestions: Arc<SuggestionEngine>,
    pub inventory: Arc<CachedInventory<Box<dyn ImageInventory>>>,
    pub chat_model: String,
}

/// Builds the shared state from configuration.
pub fn build_state(config: &Config) -> Result<AppState> {
    let mut llm = LlmClient::new(config.openai_api_key.clone())
        .context("failed to build llm client")?;
    if let Some(base_url) = &config.openai_base_url {
        llm = llm.with_base_url(base_url);
    }
    let llm = Arc::new(llm);

    let search: Arc<dyn ManualSearch> = Arc::new(RpcManualSearch::new(
        config.vector_rpc_url.clone(),
        config.vector_rpc_key.clone(),
        llm.clone(),
        config.embedding_model.clone(),
    ));

    let extractor_config = ExtractorConfig::new(allow_list_prefix(&config.image_base_url))
        .with_marker_token(IMAGE_MARKER);
    let extractor = Arc::new(
        Extractor::new(extractor_config).context("invalid image extractor configuration")?,
    );

    let suggestion_config = if config.suggestions_enabled {
        SuggestionConfig::new(config.image_base_url.trim_end_matches('/'))
            .with_rules(default_keyword_rules())
            .with_default_asset(DEFAULT_SUGGESTION_ASSET)
    } else {
        SuggestionConfig::disabled()
    };
    let suggestions = Arc::new(SuggestionEngine::new(suggestion_config));

    let storage: Box<dyn ImageInventory> = Box::new(StorageInventory::new(
        config.vector_rpc_url.clone(),
        config.vector_rpc_key.clone(),
        "images",
        config.image_base_url.clone(),
    ));
    let inventory = Arc::new(CachedInventory::new(
        storage,
        Duration::minutes(INVENTORY_TTL_MINUTES),
    ));

    Ok(AppState {
        llm,
        search,
        extractor,
        suggestions,
        inventory,
        chat_model: config.chat_model.clone(),
    })
}

/// Everything under the image base URL is extractable; the trailing slash
/// keeps `https://host/images-evil/` from matching `https://host/images`.
fn allow_list_prefix(image_base_url: &str) -> String {
    format!("{}/", image_base_url.trim_end_matches('/'))
}

/// Keyword table for the suggestion fallback.
fn default_keyword_rules() -> Vec<KeywordRule> {
    vec![
        KeywordRule::new(["camera", "카메라"], "galaxy_s25_camera.jpg", 0.8),
        KeywordRule::new(["screen", "화면", "디스플레이"], "galaxy_s25_screen.jpg", 0.8),
        KeywordRule::new(["interface", "인터페이스"], "galaxy_s25_interface.jpg", 0.7),
        KeywordRule::new(["settings", "설정"], "galaxy_s25_settings.jpg", 0.8),
        KeywordRule::new(["battery", "배터리"], "galaxy_s25_battery.jpg", 0.7),
        KeywordRule::new(["s pen", "s펜", "에스펜"], "galaxy_s25_spen.jpg", 0.9),
        KeywordRule::new(["home", "홈", "메인"], "galaxy_s25_home.jpg", 0.6),
    ]
}

/// Builds the Axum application router.
pub fn build_app(state: AppState, allowed_origins: &[String]) -> Router {
    let cors = cors_layer(allowed_origins);

    Router::new()
        .route("/api/chat", post(chat_stream_handler))
        .route("/api/chat/complete", post(chat_complete_handler))
        .route("/api/image-search", post(image_search_handler))
        .route("/health", get(health_handler))
        .layer(Extension(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    if allowed_origins.is_empty() {
        return base.allow_origin(tower_http::cors::Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "ignoring invalid allowed origin");
                None
            }
        })
        .collect();
    base.allow_origin(origins)
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::inventory::AssetEntry;
    use async_trait::async_trait;

    pub struct FixedInventory(pub Vec<AssetEntry>);

    #[async_trait]
    impl ImageInventory for FixedInventory {
        async fn list(&self) -> Result<Vec<AssetEntry>> {
            Ok(self.0.clone())
        }
    }

    /// State wired with canned collaborators. The llm client points at an
    /// unroutable host, so tests must not reach it.
    pub fn test_state(search: Arc<dyn ManualSearch>) -> AppState {
        let base_url = "https://img.example.com/manual";
        let llm = Arc::new(
            LlmClient::new("sk-test")
                .unwrap()
                .with_base_url("http://127.0.0.1:1/v1"),
        );
        let extractor = Arc::new(
            Extractor::new(
                ExtractorConfig::new(format!("{base_url}/")).with_marker_token(IMAGE_MARKER),
            )
            .unwrap(),
        );
        let suggestions = Arc::new(SuggestionEngine::new(
            SuggestionConfig::new(base_url)
                .with_rules(default_keyword_rules())
                .with_default_asset(DEFAULT_SUGGESTION_ASSET),
        ));
        let inventory: Box<dyn ImageInventory> = Box::new(FixedInventory(vec![
            AssetEntry {
                name: "galaxy_s25_camera.jpg".into(),
                url: format!("{base_url}/galaxy_s25_camera.jpg"),
            },
            AssetEntry {
                name: DEFAULT_SUGGESTION_ASSET.into(),
                url: format!("{base_url}/{DEFAULT_SUGGESTION_ASSET}"),
            },
        ]));
        AppState {
            llm,
            search,
            extractor,
            suggestions,
            inventory: Arc::new(CachedInventory::new(inventory, Duration::minutes(10))),
            chat_model: "gpt-4o-mini".into(),
        }
    }
}
