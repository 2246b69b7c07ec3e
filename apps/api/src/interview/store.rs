use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::interview::models::{InterviewMessage, InterviewSetup};
use crate::interview::prompts::system_prompt;
use crate::interview::scoring::average;
use crate::llm_client::{CompletionOptions, Role};
use crate::speech::SpeechConversation;

/// Everything said so far in one interview.
#[derive(Debug, Default)]
pub struct Transcript {
    pub messages: Vec<InterviewMessage>,
    pub question_count: u32,
    pub scores: Vec<u32>,
}

impl Transcript {
    pub fn latest_assistant(&self) -> Option<&InterviewMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }

    pub fn average_score(&self) -> Option<f32> {
        average(&self.scores)
    }
}

/// One practice interview. The transcript lock is held across a coach turn,
/// so turns within an interview never interleave.
pub struct InterviewSession {
    pub id: Uuid,
    pub setup: InterviewSetup,
    pub system_prompt: String,
    pub transcript: Mutex<Transcript>,
    pub speech: SpeechConversation,
}

impl InterviewSession {
    pub fn new(setup: InterviewSetup, speech: SpeechConversation) -> Self {
        Self {
            id: Uuid::new_v4(),
            system_prompt: system_prompt(&setup),
            setup,
            transcript: Mutex::new(Transcript::default()),
            speech,
        }
    }

    pub fn completion_options(&self) -> CompletionOptions {
        CompletionOptions::interview().with_deployment(self.setup.model.clone())
    }
}

/// In-memory interview sessions keyed by id. Nothing survives a restart.
#[derive(Default)]
pub struct InterviewStore {
    sessions: RwLock<HashMap<Uuid, Arc<InterviewSession>>>,
}

impl InterviewStore {
    pub fn insert(&self, session: Arc<InterviewSession>) {
        self.sessions.write().insert(session.id, session);
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<InterviewSession>> {
        self.sessions.read().get(&id).cloned()
    }

    pub fn remove(&self, id: Uuid) -> Option<Arc<InterviewSession>> {
        self.sessions.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }
}
