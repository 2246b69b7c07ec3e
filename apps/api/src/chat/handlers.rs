use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::llm_client::prompts::{with_resume, CAREER_BUDDY_SYSTEM};
use crate::llm_client::{ChatMessage, CompletionOptions, Role};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    /// Deployment override.
    #[serde(default)]
    pub model: Option<String>,
    /// Lines from `/api/v1/documents/extract`, attached to the last user turn.
    #[serde(default)]
    pub resume_lines: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub reply: String,
}

/// Prepends the career-buddy prompt. Client-sent system messages are dropped.
fn build_conversation(req: &ChatRequest) -> Result<Vec<ChatMessage>, AppError> {
    let mut turns: Vec<ChatMessage> = req
        .messages
        .iter()
        .filter(|m| m.role != Role::System)
        .cloned()
        .collect();

    let last_user = turns
        .iter_mut()
        .rev()
        .find(|m| m.role == Role::User)
        .ok_or_else(|| AppError::Validation("messages must contain a user turn".to_string()))?;
    if last_user.content.trim().is_empty() {
        return Err(AppError::Validation(
            "the last user message must not be empty".to_string(),
        ));
    }
    last_user.content = with_resume(&last_user.content, &req.resume_lines);

    let mut conversation = Vec::with_capacity(turns.len() + 1);
    conversation.push(ChatMessage::system(CAREER_BUDDY_SYSTEM));
    conversation.extend(turns);
    Ok(conversation)
}

fn options(req: &ChatRequest) -> CompletionOptions {
    CompletionOptions::chat().with_deployment(req.model.clone())
}

/// POST /api/v1/chat
pub async fn handle_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, AppError> {
    let conversation = build_conversation(&req)?;
    let reply = state.llm.complete(&conversation, &options(&req)).await?;
    Ok(Json(ChatReply { reply }))
}

/// POST /api/v1/chat/stream
/// Text fragments as `message` events, a failure as one `error` event, then `done`.
pub async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static>, AppError> {
    let conversation = build_conversation(&req)?;
    let fragments = state
        .llm
        .stream_complete(&conversation, &options(&req))
        .await?;

    let events = fragments
        .map(|fragment| {
            Ok::<_, Infallible>(match fragment {
                Ok(text) => Event::default().event("message").data(text),
                Err(e) => {
                    tracing::warn!("Chat stream failed: {e}");
                    Event::default().event("error").data(e.to_string())
                }
            })
        })
        .chain(stream::once(async {
            Ok::<_, Infallible>(Event::default().event("done").data("[DONE]"))
        }));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
