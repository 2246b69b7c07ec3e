use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::speech::avatar::{AVATAR_CHARACTERS, AVATAR_STYLES};
use crate::state::AppState;

/// GET /health
/// Returns service status, version, and which speech backends are available.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "career-buddy-api",
        "services": {
            "llm": {
                "configured": true,
                "deployment": state.llm.deployment(),
            },
            "tts": state.speech.tts_available(),
            "avatar": state.speech.avatar_available(),
        },
        "avatar_options": {
            "characters": AVATAR_CHARACTERS,
            "styles": AVATAR_STYLES,
        },
        "active_interviews": state.interviews.len(),
    }))
}
