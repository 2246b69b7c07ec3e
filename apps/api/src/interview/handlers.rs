use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::interview::coach::{answer_question, start_interview};
use crate::interview::models::{
    AnswerRequest, InterviewSetup, InterviewView, SpeakResponse, TurnResponse,
};
use crate::interview::store::InterviewSession;
use crate::speech::{DeliveredMedia, PlaybackRequest};
use crate::state::AppState;

fn find_session(state: &AppState, id: Uuid) -> Result<Arc<InterviewSession>, AppError> {
    state
        .interviews
        .get(id)
        .ok_or_else(|| AppError::NotFound(format!("Interview {id} not found")))
}

/// POST /api/v1/interviews
pub async fn handle_start(
    State(state): State<AppState>,
    Json(setup): Json<InterviewSetup>,
) -> Result<(StatusCode, Json<TurnResponse>), AppError> {
    let (session, response) = start_interview(&state.llm, &state.speech, setup).await?;
    state.interviews.insert(session);
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /api/v1/interviews/:id
pub async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<InterviewView>, AppError> {
    let session = find_session(&state, id)?;
    let coordinator = &session.speech.coordinator;
    let transcript = session.transcript.lock().await;

    Ok(Json(InterviewView {
        id: session.id,
        setup: session.setup.clone(),
        messages: transcript.messages.clone(),
        question_count: transcript.question_count,
        scores: transcript.scores.clone(),
        average_score: transcript.average_score(),
        speech: coordinator.session().snapshot(),
        playback: coordinator.progress(),
        deliveries: coordinator.deliveries(),
    }))
}

/// DELETE /api/v1/interviews/:id
/// Shuts down the interview's speech and forgets the interview.
pub async fn handle_reset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let session = state
        .interviews
        .remove(id)
        .ok_or_else(|| AppError::NotFound(format!("Interview {id} not found")))?;
    session.speech.coordinator.session().close().await;
    info!(session_id = %id, "Interview reset");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/interviews/:id/answers
pub async fn handle_answer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(req): Json<AnswerRequest>,
) -> Result<Json<TurnResponse>, AppError> {
    let session = find_session(&state, id)?;
    let response = answer_question(&state.llm, &session, &req.answer).await?;
    Ok(Json(response))
}

/// POST /api/v1/interviews/:id/speak
/// Plays the latest coach message in the background; progress shows up on GET.
pub async fn handle_speak(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<SpeakResponse>), AppError> {
    let session = find_session(&state, id)?;
    let prefs = &session.setup.speech;
    if !prefs.tts_enabled {
        return Err(AppError::Conflict(
            "Text-to-speech is disabled for this interview".to_string(),
        ));
    }

    let coordinator = Arc::clone(&session.speech.coordinator);
    if coordinator.session().is_speaking() {
        return Err(AppError::Conflict("The coach is already speaking".to_string()));
    }

    let message = {
        let transcript = session.transcript.lock().await;
        transcript
            .latest_assistant()
            .cloned()
            .ok_or_else(|| AppError::NotFound("No coach message to speak".to_string()))?
    };

    let request = PlaybackRequest {
        message_id: message.id,
        text: message.content,
        use_avatar: prefs.avatar_enabled && coordinator.avatar_available(),
        profile: prefs.profile.clone(),
    };
    let response = SpeakResponse {
        message_id: request.message_id,
        use_avatar: request.use_avatar,
    };

    tokio::spawn(async move {
        coordinator.play(request).await;
    });

    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// POST /api/v1/interviews/:id/stop
pub async fn handle_stop(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let session = find_session(&state, id)?;
    let stopped = session.speech.coordinator.session().stop().await;
    Ok(Json(json!({ "stopped": stopped })))
}

/// POST /api/v1/interviews/:id/skip
pub async fn handle_skip(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let session = find_session(&state, id)?;
    let skipped = session.speech.coordinator.session().skip_to_audio();
    Ok(Json(json!({ "skipped": skipped })))
}

/// GET /api/v1/interviews/:id/messages/:message_id/media
pub async fn handle_media(
    State(state): State<AppState>,
    Path((id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<Response, AppError> {
    let session = find_session(&state, id)?;
    match session.speech.media.get(message_id) {
        Some(DeliveredMedia::Audio { bytes }) => {
            Ok(([(header::CONTENT_TYPE, "audio/mpeg")], bytes).into_response())
        }
        Some(DeliveredMedia::Video { url }) => Ok(Redirect::temporary(&url).into_response()),
        None => Err(AppError::NotFound(format!(
            "No media delivered for message {message_id}"
        ))),
    }
}
