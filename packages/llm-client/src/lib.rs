//! Minimal client for OpenAI-compatible chat and embedding endpoints.
//!
//! Covers the three calls the chat service needs: whole-answer chat
//! completions, SSE-streamed completions, and text embeddings. Anything
//! beyond that (tools, images, fine-tuning) is out of scope.

mod error;
mod sse;
mod types;

pub use error::LlmError;
pub use sse::{CompletionChunk, CompletionStream};
pub use types::{ChatReply, ChatRequest, Message, Usage};

use futures::Stream;
use tracing::debug;

use types::{ChatCompletionResponse, EmbeddingRequest, EmbeddingResponse};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// HTTP client for an OpenAI-compatible REST API.
#[derive(Debug, Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl LlmClient {
    /// Builds a client against the default OpenAI endpoint.
    pub fn new(api_key: impl Into<String>) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::Config("api key must not be empty".into()));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
        })
    }

    /// Builds a client from the `OPENAI_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, LlmError> {
        let key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::Config("OPENAI_API_KEY is not set".into()))?;
        Self::new(key)
    }

    /// Points the client at a different OpenAI-compatible host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Runs a chat completion and returns the whole answer.
    pub async fn chat(&self, request: ChatRequest) -> Result<ChatReply, LlmError> {
        let mut request = request;
        request.stream = None;
        debug!(model = %request.model, messages = request.messages.len(), "chat completion");
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let parsed: ChatCompletionResponse = response.json().await.map_err(|err| {
            LlmError::Parse(format!("bad chat completion body: {err}"))
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| LlmError::Parse("completion had no choices".into()))?;
        Ok(ChatReply { content, usage: parsed.usage })
    }

    /// Runs a chat completion and yields the answer incrementally.
    pub async fn chat_stream(
        &self,
        request: ChatRequest,
    ) -> Result<CompletionStream<impl Stream<Item = Result<bytes::Bytes, reqwest::Error>>>, LlmError>
    {
        let mut request = request;
        request.stream = Some(true);
        debug!(model = %request.model, messages = request.messages.len(), "streamed chat completion");
        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(CompletionStream::new(response.bytes_stream()))
    }

    /// Embeds a single text and returns its vector.
    pub async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>, LlmError> {
        debug!(model, chars = text.len(), "embedding");
        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest { model, input: text })
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| LlmError::Parse(format!("bad embedding body: {err}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .ok_or_else(|| LlmError::Parse("embedding response had no rows".into()))
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_else(|_| "<no body>".into());
        Err(LlmError::Api { status: status.as_u16(), message })
    }
}
