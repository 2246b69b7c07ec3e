use std::sync::Arc;

use crate::interview::store::InterviewStore;
use crate::llm_client::LlmClient;
use crate::speech::SpeechServices;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub llm: LlmClient,
    /// In-memory practice interviews, each with its own speech session.
    pub interviews: Arc<InterviewStore>,
    /// Speech backends. Either may be missing; see `SpeechServices::from_settings`.
    pub speech: SpeechServices,
}

impl AppState {
    pub fn new(llm: LlmClient, speech: SpeechServices) -> Self {
        Self {
            llm,
            interviews: Arc::new(InterviewStore::default()),
            speech,
        }
    }
}
