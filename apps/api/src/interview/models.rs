use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::llm_client::{ChatMessage, Role};
use crate::speech::coordinator::{DeliveryRecord, PlaybackProgress};
use crate::speech::session::SessionSnapshot;
use crate::speech::AvatarProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewMode {
    /// One question at a time with immediate feedback.
    #[default]
    Practice,
    /// A complete 30-45 minute interview simulation.
    Full,
    /// 5-10 common questions, rapid fire.
    QuickPrep,
}

impl InterviewMode {
    pub fn describe(self) -> &'static str {
        match self {
            InterviewMode::Practice => "Practice Mode (one question at a time)",
            InterviewMode::Full => "Full Interview (30-45 minutes)",
            InterviewMode::QuickPrep => "Quick Prep (5-10 questions)",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechPreferences {
    #[serde(default = "default_true")]
    pub tts_enabled: bool,
    #[serde(default)]
    pub avatar_enabled: bool,
    #[serde(default)]
    pub profile: AvatarProfile,
}

fn default_true() -> bool {
    true
}

impl Default for SpeechPreferences {
    fn default() -> Self {
        Self {
            tts_enabled: true,
            avatar_enabled: false,
            profile: AvatarProfile::default(),
        }
    }
}

/// Request body for `POST /api/v1/interviews`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterviewSetup {
    pub job_role: String,
    pub experience_level: String,
    pub company_type: String,
    #[serde(default)]
    pub mode: InterviewMode,
    /// Deployment override; the configured default is used when absent.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub speech: SpeechPreferences,
}

impl InterviewSetup {
    pub fn validate(&self) -> Result<(), AppError> {
        for (field, value) in [
            ("job_role", &self.job_role),
            ("experience_level", &self.experience_level),
            ("company_type", &self.company_type),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::Validation(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}

/// One transcript entry. The coach's system prompt is never part of the transcript.
#[derive(Debug, Clone, Serialize)]
pub struct InterviewMessage {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl InterviewMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub answer: String,
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub interview_id: Uuid,
    pub message: InterviewMessage,
    pub question_count: u32,
    pub score: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct SpeakResponse {
    pub message_id: Uuid,
    pub use_avatar: bool,
}

#[derive(Debug, Serialize)]
pub struct InterviewView {
    pub id: Uuid,
    pub setup: InterviewSetup,
    pub messages: Vec<InterviewMessage>,
    pub question_count: u32,
    pub scores: Vec<u32>,
    pub average_score: Option<f32>,
    #[serde(flatten)]
    pub speech: SessionSnapshot,
    pub playback: PlaybackProgress,
    pub deliveries: HashMap<Uuid, DeliveryRecord>,
}
