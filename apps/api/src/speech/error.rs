use std::time::Duration;

use thiserror::Error;

/// Failures inside the speech layer.
///
/// None of these escape `FallbackCoordinator::play` or `SpeechSession::speak`;
/// they are logged and folded into an outcome value. User cancellation is not an
/// error and has no variant here.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("Speech service not configured: {0}")]
    Configuration(String),

    #[error("Speech transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Speech API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Speech request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Could not present media: {0}")]
    Render(String),

    #[error("Synthesizer handle is closed")]
    Closed,
}

impl SpeechError {
    /// Builds an `Api` error from a response body, keeping at most 200 characters of it.
    pub fn api(status: u16, body: &str) -> Self {
        SpeechError::Api {
            status,
            message: body.chars().take(200).collect(),
        }
    }
}
