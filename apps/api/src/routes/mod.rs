pub mod health;
#[cfg(test)]
pub(crate) mod testing;

use axum::{
    routing::{get, post},
    Router,
};

use crate::chat::handlers as chat;
use crate::documents::handlers as documents;
use crate::interview::handlers as interview;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Career chat
        .route("/api/v1/chat", post(chat::handle_chat))
        .route("/api/v1/chat/stream", post(chat::handle_chat_stream))
        .route(
            "/api/v1/documents/extract",
            post(documents::handle_extract),
        )
        // Interview practice
        .route("/api/v1/interviews", post(interview::handle_start))
        .route(
            "/api/v1/interviews/:id",
            get(interview::handle_get).delete(interview::handle_reset),
        )
        .route(
            "/api/v1/interviews/:id/answers",
            post(interview::handle_answer),
        )
        .route("/api/v1/interviews/:id/speak", post(interview::handle_speak))
        .route("/api/v1/interviews/:id/stop", post(interview::handle_stop))
        .route("/api/v1/interviews/:id/skip", post(interview::handle_skip))
        .route(
            "/api/v1/interviews/:id/messages/:message_id/media",
            get(interview::handle_media),
        )
        .with_state(state)
}
