//! Router test helpers: a scripted chat-completions server and state builders.

use std::sync::Arc;

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::llm_client::LlmClient;
use crate::speech::SpeechServices;
use crate::state::AppState;

const FALLBACK_REPLY: &str = "Thank you. What would you like to discuss next?";

/// Serves `replies` in order, then a fixed reply. Streaming requests get the
/// next reply split into two SSE fragments.
pub async fn spawn_llm_stub(replies: Vec<&str>) -> LlmClient {
    let replies: Arc<Mutex<Vec<String>>> =
        Arc::new(Mutex::new(replies.into_iter().map(String::from).collect()));

    async fn handle(
        State(replies): State<Arc<Mutex<Vec<String>>>>,
        Json(body): Json<Value>,
    ) -> Response {
        let reply = {
            let mut replies = replies.lock();
            if replies.is_empty() {
                FALLBACK_REPLY.to_string()
            } else {
                replies.remove(0)
            }
        };

        if body["stream"].as_bool() == Some(true) {
            let split = reply
                .char_indices()
                .nth(reply.chars().count() / 2)
                .map_or(0, |(i, _)| i);
            let (head, tail) = reply.split_at(split);
            let mut sse = String::new();
            for fragment in [head, tail] {
                let chunk = json!({"choices": [{"delta": {"content": fragment}}]});
                sse.push_str(&format!("data: {chunk}\n\n"));
            }
            sse.push_str("data: [DONE]\n\n");
            return ([("content-type", "text/event-stream")], sse).into_response();
        }

        Json(json!({
            "choices": [{"message": {"role": "assistant", "content": reply}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 10}
        }))
        .into_response()
    }

    let app = Router::new()
        .route(
            "/openai/deployments/:deployment/chat/completions",
            post(handle),
        )
        .with_state(replies);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    LlmClient::new(format!("http://{addr}"), "test-key", "2024-02-01", "gpt-4").unwrap()
}

pub fn state_with(llm: LlmClient, speech: SpeechServices) -> AppState {
    AppState::new(llm, speech)
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
