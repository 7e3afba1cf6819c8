//! Chat endpoints.
//!
//! POST /api/chat          - SSE-streamed answer with image references
//! POST /api/chat/complete - whole answer as a single JSON response
//!
//! Both run the same turn: retrieve manual passages, prompt the model, then
//! scan the answer for image references. The streamed variant forwards text
//! deltas as they arrive and sends images in one event after the answer is
//! complete, so the client never renders a half-parsed directive.

use std::convert::Infallible;

use axum::{
    extract::Extension,
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::StreamExt;
use image_refs::ImageReference;
use llm_client::{ChatRequest, Message};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, warn};

use crate::app::AppState;
use crate::prompts::build_messages;
use crate::search::format_context;

/// Accepted request body shapes. Clients have shipped all four of these over
/// time, so each deserializes to the same turn.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ChatBody {
    Messages { messages: Vec<IncomingMessage> },
    Single { message: String },
    Content { content: String },
    Query { query: String },
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    #[serde(default = "default_role")]
    pub role: String,
    pub content: String,
}

fn default_role() -> String {
    "user".to_string()
}

/// One resolved chat turn: the question plus everything said before it.
#[derive(Debug)]
pub struct ChatTurn {
    pub query: String,
    pub history: Vec<Message>,
}

impl ChatBody {
    /// Resolves the body into a turn. Returns `None` when there is no
    /// non-empty user text to answer.
    pub fn into_turn(self) -> Option<ChatTurn> {
        match self {
            ChatBody::Messages { messages } => {
                let last_user = messages
                    .iter()
                    .rposition(|m| m.role == "user" && !m.content.trim().is_empty())?;
                let query = messages[last_user].content.trim().to_string();
                let history = messages[..last_user]
                    .iter()
                    .filter(|m| !m.content.trim().is_empty())
                    .map(|m| Message { role: m.role.clone(), content: m.content.clone() })
                    .collect();
                Some(ChatTurn { query, history })
            }
            ChatBody::Single { message: text }
            | ChatBody::Content { content: text }
            | ChatBody::Query { query: text } => {
                let query = text.trim().to_string();
                if query.is_empty() {
                    return None;
                }
                Some(ChatTurn { query, history: Vec::new() })
            }
        }
    }
}

fn bad_request(message: &str) -> (StatusCode, Json<Value>) {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

/// POST /api/chat
pub async fn chat_stream_handler(
    Extension(state): Extension<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, (StatusCode, Json<Value>)>
{
    let turn = body
        .into_turn()
        .ok_or_else(|| bad_request("request contained no user message"))?;

    let (tx, rx) = mpsc::channel::<Event>(32);
    tokio::spawn(run_streamed_turn(state, turn, tx));

    let events = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn run_streamed_turn(state: AppState, turn: ChatTurn, tx: mpsc::Sender<Event>) {
    let send = |event: Value| {
        let tx = tx.clone();
        async move {
            if let Ok(event) = Event::default().json_data(&event) {
                // A closed receiver means the client went away; nothing to do.
                let _ = tx.send(event).await;
            }
        }
    };

    let context = retrieve_context(&state, &turn.query).await;
    let messages = build_messages(
        &context,
        &turn.history,
        &turn.query,
        &state.extractor.config().allowed_url_prefix,
    );
    let request = ChatRequest::new(&state.chat_model, messages);

    let stream = match state.llm.chat_stream(request).await {
        Ok(stream) => stream,
        Err(err) => {
            error!(error = %err, "failed to start chat completion");
            send(json!({ "type": "error", "content": "답변 생성에 실패했습니다." })).await;
            send(json!({ "type": "finish" })).await;
            return;
        }
    };

    let mut stream = std::pin::pin!(stream);
    let mut answer = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) if chunk.done => break,
            Ok(chunk) => {
                answer.push_str(&chunk.delta);
                send(json!({ "type": "text-delta", "content": chunk.delta })).await;
            }
            Err(err) => {
                error!(error = %err, "chat stream aborted");
                send(json!({ "type": "error", "content": "답변이 중단되었습니다." })).await;
                break;
            }
        }
    }

    let images = collect_images(&state, &turn.query, &answer);
    if !images.is_empty() {
        send(json!({ "type": "images", "content": images })).await;
    }
    send(json!({ "type": "finish" })).await;
}

/// POST /api/chat/complete
pub async fn chat_complete_handler(
    Extension(state): Extension<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let turn = body
        .into_turn()
        .ok_or_else(|| bad_request("request contained no user message"))?;

    let context = retrieve_context(&state, &turn.query).await;
    let messages = build_messages(
        &context,
        &turn.history,
        &turn.query,
        &state.extractor.config().allowed_url_prefix,
    );
    let request = ChatRequest::new(&state.chat_model, messages);

    let reply = state.llm.chat(request).await.map_err(|err| {
        error!(error = %err, "chat completion failed");
        (
            StatusCode::BAD_GATEWAY,
            Json(json!({ "error": "답변 생성에 실패했습니다." })),
        )
    })?;

    let outcome = state.extractor.extract(&reply.content);
    let answer = outcome.cleaned_text.unwrap_or_else(|| reply.content.clone());
    let images = if outcome.references.is_empty() {
        state.suggestions.suggest(&turn.query, &reply.content)
    } else {
        outcome.references
    };

    Ok(Json(json!({
        "answer": answer,
        "images": images,
        "context": context,
    })))
}

async fn retrieve_context(state: &AppState, query: &str) -> String {
    match state.search.search(query).await {
        Ok(passages) => format_context(&passages),
        Err(err) => {
            // Retrieval failure degrades to an ungrounded answer rather than
            // taking the whole turn down.
            warn!(error = %err, "manual search failed");
            format_context(&[])
        }
    }
}

fn collect_images(state: &AppState, query: &str, answer: &str) -> Vec<ImageReference> {
    let outcome = state.extractor.extract(answer);
    if !outcome.references.is_empty() {
        return outcome.references;
    }
    state.suggestions.suggest(query, answer)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(json: Value) -> Option<ChatTurn> {
        serde_json::from_value::<ChatBody>(json).unwrap().into_turn()
    }

    #[test]
    fn messages_shape_takes_last_user_message() {
        let turn = turn(json!({
            "messages": [
                { "role": "user", "content": "첫 질문" },
                { "role": "assistant", "content": "첫 답변" },
                { "role": "user", "content": "카메라 설정 알려줘" }
            ]
        }))
        .unwrap();
        assert_eq!(turn.query, "카메라 설정 알려줘");
        assert_eq!(turn.history.len(), 2);
        assert_eq!(turn.history[1].role, "assistant");
    }

    #[test]
    fn single_message_shape() {
        let turn = turn(json!({ "message": "배터리 오래 쓰는 법" })).unwrap();
        assert_eq!(turn.query, "배터리 오래 쓰는 법");
        assert!(turn.history.is_empty());
    }

    #[test]
    fn content_shape() {
        assert_eq!(turn(json!({ "content": "S펜 기능" })).unwrap().query, "S펜 기능");
    }

    #[test]
    fn query_shape() {
        assert_eq!(turn(json!({ "query": "화면 밝기" })).unwrap().query, "화면 밝기");
    }

    #[test]
    fn missing_role_defaults_to_user() {
        let turn = turn(json!({ "messages": [{ "content": "질문" }] })).unwrap();
        assert_eq!(turn.query, "질문");
    }

    #[test]
    fn whitespace_only_message_is_rejected() {
        assert!(turn(json!({ "message": "   " })).is_none());
    }

    #[test]
    fn messages_without_any_user_turn_are_rejected() {
        assert!(turn(json!({
            "messages": [{ "role": "assistant", "content": "안녕하세요" }]
        }))
        .is_none());
    }

    #[test]
    fn trailing_assistant_message_is_skipped() {
        let turn = turn(json!({
            "messages": [
                { "role": "user", "content": "질문" },
                { "role": "assistant", "content": "생성 중이던 답변" }
            ]
        }))
        .unwrap();
        assert_eq!(turn.query, "질문");
        assert_eq!(turn.history.len(), 1);
    }

    #[test]
    fn unknown_body_shape_fails_to_deserialize() {
        assert!(serde_json::from_value::<ChatBody>(json!({ "prompt": "hi" })).is_err());
    }

    mod service {
        use super::super::{collect_images, retrieve_context};
        use crate::app::testing::test_state;
        use crate::search::testing::MockManualSearch;
        use crate::search::{Passage, NO_CONTEXT_FALLBACK};
        use std::sync::Arc;

        #[tokio::test]
        async fn retrieval_results_become_prompt_context() {
            let state = test_state(Arc::new(MockManualSearch::returning(vec![Passage {
                content: "카메라 앱을 실행합니다".into(),
                page: Some(12),
                category: Some("camera".into()),
                similarity: 0.82,
            }])));
            let context = retrieve_context(&state, "카메라 어떻게 켜요?").await;
            assert!(context.contains("[p.12] 카메라 앱을 실행합니다"));
        }

        #[tokio::test]
        async fn retrieval_failure_degrades_to_fallback_context() {
            let state = test_state(Arc::new(MockManualSearch::failing()));
            let context = retrieve_context(&state, "카메라").await;
            assert_eq!(context, NO_CONTEXT_FALLBACK);
        }

        #[tokio::test]
        async fn directives_in_the_answer_win_over_suggestions() {
            let state = test_state(Arc::new(MockManualSearch::returning(Vec::new())));
            let answer = "카메라 설정은 이렇게 합니다.\n\
                          [이미지 1]\n\
                          https://img.example.com/manual/galaxy_s25_camera.jpg";
            let images = collect_images(&state, "카메라 설정", answer);
            assert_eq!(images.len(), 1);
            assert_eq!(
                images[0].url,
                "https://img.example.com/manual/galaxy_s25_camera.jpg"
            );
            assert_eq!(images[0].label, "1");
        }

        #[tokio::test]
        async fn answers_without_directives_fall_back_to_keyword_suggestions() {
            let state = test_state(Arc::new(MockManualSearch::returning(Vec::new())));
            let images = collect_images(&state, "카메라 기능이 궁금해요", "카메라는 우측 하단 버튼입니다.");
            assert!(!images.is_empty());
            assert!(images[0].url.ends_with("galaxy_s25_camera.jpg"));
        }

        #[tokio::test]
        async fn off_allow_list_urls_never_surface() {
            let state = test_state(Arc::new(MockManualSearch::returning(Vec::new())));
            let answer = "[이미지 1]\nhttps://evil.example.com/steal.jpg";
            // The directive is rejected, so the turn falls back to suggestions,
            // which only ever point at the configured base URL.
            let images = collect_images(&state, "일반 질문", answer);
            assert!(images
                .iter()
                .all(|image| image.url.starts_with("https://img.example.com/manual/")));
        }
    }
}
