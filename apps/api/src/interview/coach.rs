//! Coach turns: the opening question and answer feedback.

use std::sync::Arc;

use tracing::info;

use crate::errors::AppError;
use crate::interview::models::{InterviewMessage, InterviewSetup, TurnResponse};
use crate::interview::prompts::{feedback_prompt, OPENING_QUESTION_PROMPT};
use crate::interview::scoring::extract_score;
use crate::interview::store::{InterviewSession, Transcript};
use crate::llm_client::{ChatMessage, LlmClient, Role};
use crate::speech::SpeechServices;

/// Creates an interview and asks the coach for the opening question.
pub async fn start_interview(
    llm: &LlmClient,
    speech: &SpeechServices,
    setup: InterviewSetup,
) -> Result<(Arc<InterviewSession>, TurnResponse), AppError> {
    setup.validate()?;
    let session = Arc::new(InterviewSession::new(setup, speech.new_conversation()));

    let message = {
        let mut transcript = session.transcript.lock().await;
        let request = conversation(&session, &transcript, OPENING_QUESTION_PROMPT);
        let reply = llm.complete(&request, &session.completion_options()).await?;

        let message = InterviewMessage::new(Role::Assistant, reply);
        transcript.messages.push(message.clone());
        transcript.question_count = 1;
        message
    };

    info!(
        session_id = %session.id,
        job_role = %session.setup.job_role,
        "Interview started"
    );

    let response = TurnResponse {
        interview_id: session.id,
        message,
        question_count: 1,
        score: None,
    };
    Ok((session, response))
}

/// Records the candidate's answer and returns the coach's feedback plus next question.
/// A failed coach call leaves the transcript as it was.
pub async fn answer_question(
    llm: &LlmClient,
    session: &InterviewSession,
    answer: &str,
) -> Result<TurnResponse, AppError> {
    let answer = answer.trim();
    if answer.is_empty() {
        return Err(AppError::Validation("answer must not be empty".to_string()));
    }

    let mut transcript = session.transcript.lock().await;
    transcript
        .messages
        .push(InterviewMessage::new(Role::User, answer));

    let request = conversation(session, &transcript, &feedback_prompt(answer));
    let reply = match llm.complete(&request, &session.completion_options()).await {
        Ok(reply) => reply,
        Err(e) => {
            transcript.messages.pop();
            return Err(e.into());
        }
    };

    let score = extract_score(&reply);
    if let Some(score) = score {
        transcript.scores.push(score);
    }
    transcript.question_count += 1;
    let message = InterviewMessage::new(Role::Assistant, reply);
    transcript.messages.push(message.clone());

    info!(
        session_id = %session.id,
        question_count = transcript.question_count,
        score = ?score,
        "Interview answer evaluated"
    );

    Ok(TurnResponse {
        interview_id: session.id,
        message,
        question_count: transcript.question_count,
        score,
    })
}

/// System prompt, transcript, then the turn instruction as a final user message.
fn conversation(
    session: &InterviewSession,
    transcript: &Transcript,
    instruction: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(transcript.messages.len() + 2);
    messages.push(ChatMessage::system(session.system_prompt.clone()));
    messages.extend(transcript.messages.iter().map(InterviewMessage::to_chat));
    messages.push(ChatMessage::user(instruction));
    messages
}
