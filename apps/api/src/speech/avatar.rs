//! Avatar batch synthesis — job descriptor, job lifecycle, and the HTTP client.
//!
//! A job is submitted with `PUT {endpoint}/avatar/batchsyntheses/{job_id}` and
//! polled with `GET` on the same URL. The client performs exactly one request
//! per call and never retries; pacing and deadlines belong to the poll loop.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::speech::error::SpeechError;

pub const AVATAR_API_VERSION: &str = "2024-04-15-preview";
/// Voice used for avatar videos.
pub const AVATAR_VOICE: &str = "en-US-AvaMultilingualNeural";
/// The service rejects longer inputs; text beyond this is dropped, not an error.
pub const MAX_AVATAR_TEXT_CHARS: usize = 1000;
pub const AVATAR_CHARACTERS: &[&str] = &["lisa", "jason", "clara", "sarah", "nancy"];
pub const AVATAR_STYLES: &[&str] = &["casual-sitting", "business-standing", "professional-sitting"];

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_TIMEOUT: Duration = Duration::from_secs(10);

// ────────────────────────────────────────────────────────────────────────────
// Avatar profile and job lifecycle
// ────────────────────────────────────────────────────────────────────────────

/// Which talking-head character renders the video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarProfile {
    pub character: String,
    pub style: String,
}

impl Default for AvatarProfile {
    fn default() -> Self {
        Self {
            character: "lisa".to_string(),
            style: "casual-sitting".to_string(),
        }
    }
}

impl AvatarProfile {
    /// Blank fields fall back to the default avatar; other names pass through as given.
    pub fn normalized(&self) -> AvatarProfile {
        let default = AvatarProfile::default();
        AvatarProfile {
            character: non_blank(&self.character).unwrap_or(default.character),
            style: non_blank(&self.style).unwrap_or(default.style),
        }
    }
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AvatarJobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

impl AvatarJobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AvatarJobStatus::Succeeded
                | AvatarJobStatus::Failed
                | AvatarJobStatus::TimedOut
                | AvatarJobStatus::Skipped
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid avatar job transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: AvatarJobStatus,
    pub to: AvatarJobStatus,
}

/// One avatar synthesis request as tracked locally.
#[derive(Debug, Clone, Serialize)]
pub struct AvatarJob {
    pub id: String,
    pub status: AvatarJobStatus,
    pub result_url: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl AvatarJob {
    pub fn submitted(id: String, timeout: Duration) -> Self {
        let submitted_at = Utc::now();
        let deadline = submitted_at
            + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            id,
            status: AvatarJobStatus::Submitted,
            result_url: None,
            submitted_at,
            deadline,
        }
    }

    /// Applies a status change. Terminal states are final, nothing returns to
    /// `Submitted`, and `Succeeded` must carry its result URL.
    pub fn advance(
        &mut self,
        to: AvatarJobStatus,
        result_url: Option<String>,
    ) -> Result<(), InvalidTransition> {
        let invalid = InvalidTransition {
            from: self.status,
            to,
        };
        if self.status.is_terminal() || to == AvatarJobStatus::Submitted {
            return Err(invalid);
        }
        match (to, result_url) {
            (AvatarJobStatus::Succeeded, Some(url)) => self.result_url = Some(url),
            (AvatarJobStatus::Succeeded, None) => return Err(invalid),
            _ => {}
        }
        self.status = to;
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobDescriptor<'a> {
    synthesis_config: SynthesisConfig<'a>,
    input_kind: &'a str,
    inputs: Vec<JobInput>,
    avatar_config: AvatarConfig<'a>,
}

#[derive(Debug, Serialize)]
struct SynthesisConfig<'a> {
    voice: &'a str,
}

#[derive(Debug, Serialize)]
struct JobInput {
    content: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AvatarConfig<'a> {
    customized: bool,
    talking_avatar_character: &'a str,
    talking_avatar_style: &'a str,
    video_format: &'a str,
    video_codec: &'a str,
    subtitle_type: &'a str,
    background_color: &'a str,
}

/// Status string reported by the batch synthesis service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum RemoteJobStatus {
    NotStarted,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

impl RemoteJobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RemoteJobStatus::NotStarted => "NotStarted",
            RemoteJobStatus::Running => "Running",
            RemoteJobStatus::Succeeded => "Succeeded",
            RemoteJobStatus::Failed => "Failed",
            RemoteJobStatus::Unknown => "Unknown",
        }
    }
}

#[derive(Debug, Deserialize)]
struct JobStatusBody {
    #[serde(default = "unknown_status")]
    status: RemoteJobStatus,
    outputs: Option<JobOutputs>,
    error: Option<JobErrorBody>,
}

fn unknown_status() -> RemoteJobStatus {
    RemoteJobStatus::Unknown
}

#[derive(Debug, Deserialize)]
struct JobOutputs {
    result: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobErrorBody {
    message: Option<String>,
}

/// Result of a single status check.
#[derive(Debug, Clone, PartialEq)]
pub struct JobStatusReport {
    pub status: RemoteJobStatus,
    pub result_url: Option<String>,
    pub error_message: Option<String>,
}

impl JobStatusReport {
    pub fn running() -> Self {
        Self {
            status: RemoteJobStatus::Running,
            result_url: None,
            error_message: None,
        }
    }
}

impl From<JobStatusBody> for JobStatusReport {
    fn from(body: JobStatusBody) -> Self {
        Self {
            status: body.status,
            result_url: body.outputs.and_then(|o| o.result),
            error_message: body.error.and_then(|e| e.message),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// Job-based avatar API, as seen by the poll loop and the coordinator.
#[async_trait]
pub trait AvatarJobApi: Send + Sync {
    /// Submits a job keyed by `job_id`. `true` only if the service accepted it.
    async fn submit(&self, job_id: &str, text: &str, profile: &AvatarProfile) -> bool;

    /// One status check; never blocks beyond the request itself.
    async fn poll(&self, job_id: &str) -> Result<JobStatusReport, SpeechError>;

    /// Asks the service to drop a job nobody is waiting for anymore.
    async fn cancel(&self, job_id: &str) -> Result<(), SpeechError>;
}

/// HTTP client for Azure avatar batch synthesis.
#[derive(Clone)]
pub struct AvatarJobClient {
    client: Client,
    endpoint: String,
    subscription_key: Option<String>,
}

impl AvatarJobClient {
    pub fn new(client: Client, endpoint: &str, subscription_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            subscription_key,
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.subscription_key.is_some()
    }

    fn job_url(&self, job_id: &str) -> String {
        format!(
            "{}/avatar/batchsyntheses/{job_id}?api-version={AVATAR_API_VERSION}",
            self.endpoint
        )
    }

    fn key(&self) -> Result<&str, SpeechError> {
        self.subscription_key.as_deref().ok_or_else(|| {
            SpeechError::Configuration("AZURE_SPEECH_KEY is not set".to_string())
        })
    }
}

#[async_trait]
impl AvatarJobApi for AvatarJobClient {
    async fn submit(&self, job_id: &str, text: &str, profile: &AvatarProfile) -> bool {
        let key = match self.key() {
            Ok(key) => key,
            Err(e) => {
                warn!(job_id, "Avatar submission skipped: {e}");
                return false;
            }
        };

        let profile = profile.normalized();
        let descriptor = build_descriptor(text, &profile);

        let response = self
            .client
            .put(self.job_url(job_id))
            .header(SUBSCRIPTION_KEY_HEADER, key)
            .timeout(SUBMIT_TIMEOUT)
            .json(&descriptor)
            .send()
            .await;

        match response {
            Ok(r) if r.status().as_u16() < 400 => {
                info!(job_id, character = %profile.character, "Avatar synthesis job submitted");
                true
            }
            Ok(r) => {
                let status = r.status().as_u16();
                let body = r.text().await.unwrap_or_default();
                warn!(job_id, "Avatar submission rejected: {}", SpeechError::api(status, &body));
                false
            }
            Err(e) => {
                warn!(job_id, "Avatar submission failed: {e}");
                false
            }
        }
    }

    async fn poll(&self, job_id: &str) -> Result<JobStatusReport, SpeechError> {
        let response = self
            .client
            .get(self.job_url(job_id))
            .header(SUBSCRIPTION_KEY_HEADER, self.key()?)
            .timeout(POLL_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::api(status.as_u16(), &body));
        }

        let body: JobStatusBody = response.json().await?;
        let report = JobStatusReport::from(body);
        debug!(job_id, status = report.status.as_str(), "Avatar job polled");
        Ok(report)
    }

    async fn cancel(&self, job_id: &str) -> Result<(), SpeechError> {
        let response = self
            .client
            .delete(self.job_url(job_id))
            .header(SUBSCRIPTION_KEY_HEADER, self.key()?)
            .timeout(POLL_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::api(status.as_u16(), &body));
        }
        Ok(())
    }
}

/// Keeps the first [`MAX_AVATAR_TEXT_CHARS`] characters of `text`.
pub fn truncate_for_avatar(text: &str) -> String {
    text.chars().take(MAX_AVATAR_TEXT_CHARS).collect()
}

fn build_descriptor<'a>(text: &str, profile: &'a AvatarProfile) -> JobDescriptor<'a> {
    JobDescriptor {
        synthesis_config: SynthesisConfig {
            voice: AVATAR_VOICE,
        },
        input_kind: "plainText",
        inputs: vec![JobInput {
            content: truncate_for_avatar(text),
        }],
        avatar_config: AvatarConfig {
            customized: false,
            talking_avatar_character: &profile.character,
            talking_avatar_style: &profile.style,
            video_format: "mp4",
            video_codec: "h264",
            subtitle_type: "soft_embedded",
            background_color: "#FFFFFFFF",
        },
    }
}
