//! Manual-passage retrieval over a vector RPC backend.
//!
//! Queries are embedded, then matched against pre-embedded manual chunks
//! through a stored procedure. The trait boundary keeps route handlers
//! testable without a live backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use llm_client::LlmClient;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

const MATCH_THRESHOLD: f32 = 0.5;
const MATCH_COUNT: u32 = 5;

/// Shown to the model when retrieval finds nothing relevant.
pub const NO_CONTEXT_FALLBACK: &str =
    "관련 매뉴얼 내용을 찾지 못했습니다. 일반적인 지식으로 답변해 주세요.";

/// One retrieved manual chunk.
#[derive(Debug, Clone, Deserialize)]
pub struct Passage {
    pub content: String,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub similarity: f32,
}

#[async_trait]
pub trait ManualSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<Passage>>;
}

/// Trims whitespace and drops a single trailing sentence terminator so
/// "카메라 설정은?" and "카메라 설정은" embed to the same neighborhood.
pub fn normalize_query(query: &str) -> String {
    let trimmed = query.trim();
    trimmed
        .strip_suffix(&['.', '!', '?'][..])
        .unwrap_or(trimmed)
        .trim_end()
        .to_string()
}

/// Renders passages into the prompt context block.
pub fn format_context(passages: &[Passage]) -> String {
    if passages.is_empty() {
        return NO_CONTEXT_FALLBACK.to_string();
    }
    passages
        .iter()
        .map(|passage| match passage.page {
            Some(page) => format!("[p.{page}] {}", passage.content),
            None => passage.content.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// [`ManualSearch`] backed by an embedding call plus a vector RPC.
pub struct RpcManualSearch {
    http: reqwest::Client,
    rpc_url: String,
    rpc_key: String,
    llm: Arc<LlmClient>,
    embedding_model: String,
}

#[derive(Serialize)]
struct MatchParams<'a> {
    query_embedding: &'a [f32],
    match_threshold: f32,
    match_count: u32,
}

impl RpcManualSearch {
    pub fn new(
        rpc_url: impl Into<String>,
        rpc_key: impl Into<String>,
        llm: Arc<LlmClient>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_url: rpc_url.into().trim_end_matches('/').to_string(),
            rpc_key: rpc_key.into(),
            llm,
            embedding_model: embedding_model.into(),
        }
    }
}

#[async_trait]
impl ManualSearch for RpcManualSearch {
    async fn search(&self, query: &str) -> Result<Vec<Passage>> {
        let normalized = normalize_query(query);
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        let embedding = self
            .llm
            .embed(&normalized, &self.embedding_model)
            .await
            .context("failed to embed query")?;

        let response = self
            .http
            .post(format!(
                "{}/rest/v1/rpc/match_text_embeddings",
                self.rpc_url
            ))
            .header("apikey", &self.rpc_key)
            .bearer_auth(&self.rpc_key)
            .json(&MatchParams {
                query_embedding: &embedding,
                match_threshold: MATCH_THRESHOLD,
                match_count: MATCH_COUNT,
            })
            .send()
            .await
            .context("vector rpc request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %body, "vector rpc returned an error");
            anyhow::bail!("vector rpc returned status {status}");
        }

        let passages: Vec<Passage> = response
            .json()
            .await
            .context("vector rpc returned an unexpected body")?;
        debug!(query = %normalized, matches = passages.len(), "manual search complete");
        Ok(passages)
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;

    /// Canned-result search for handler tests.
    pub struct MockManualSearch {
        pub passages: Vec<Passage>,
        pub fail: bool,
    }

    impl MockManualSearch {
        pub fn returning(passages: Vec<Passage>) -> Self {
            Self { passages, fail: false }
        }

        pub fn failing() -> Self {
            Self { passages: Vec::new(), fail: true }
        }
    }

    #[async_trait]
    impl ManualSearch for MockManualSearch {
        async fn search(&self, _query: &str) -> Result<Vec<Passage>> {
            if self.fail {
                anyhow::bail!("search backend unavailable");
            }
            Ok(self.passages.clone())
        }
    }
}
