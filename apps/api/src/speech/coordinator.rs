//! Fallback Coordinator — speaks one assistant message through the fallback chain.
//!
//! Chain: avatar video → plain TTS → no audio. Exactly one pipeline runs per
//! message; replaying a message returns the recorded result without new
//! synthesis. Nothing here returns an error: every failure is logged, turned
//! into a one-shot notice on the progress channel, and answered with the next
//! strategy.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::speech::avatar::{AvatarJob, AvatarJobApi, AvatarProfile};
use crate::speech::media::MediaRenderer;
use crate::speech::poll_loop::{
    run_poll_loop, PollEvent, PollObserver, PollOutcome, PollState, SkipReason,
};
use crate::speech::session::{BeginError, OperationKind, SpeakOutcome, SpeechSession};

/// One assistant message to speak. Consumed by a single `play` call.
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub message_id: Uuid,
    pub text: String,
    pub use_avatar: bool,
    pub profile: AvatarProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveredSource {
    Avatar,
    Plain,
}

/// Per-message ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "source")]
pub enum DeliveryRecord {
    InFlight,
    Delivered(DeliveredSource),
    NoAudio,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackPhase {
    #[default]
    Idle,
    SubmittingAvatar,
    GeneratingAvatar,
    PlayingAudio,
    Delivered,
    NoAudio,
}

/// What display code shows about the current playback. Fed by the poll loop's
/// transitions and by the coordinator's own fallbacks.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlaybackProgress {
    pub message_id: Option<Uuid>,
    pub phase: PlaybackPhase,
    pub progress: f32,
    pub remote_status: Option<String>,
    pub skip_offered: bool,
    pub notice: Option<String>,
}

/// Mirrors the poll loop's transitions onto the progress channel.
impl PollObserver for watch::Sender<PlaybackProgress> {
    fn on_event(&self, event: &PollEvent) {
        self.send_modify(|p| {
            if !event.state.is_terminal() {
                p.phase = PlaybackPhase::GeneratingAvatar;
            }
            p.progress = event.progress;
            p.remote_status = Some(event.remote_status.to_string());
            p.skip_offered = event.state == PollState::SkipOffered;
        });
    }
}

enum PipelineResult {
    Delivered(DeliveredSource),
    NoAudio,
    /// Another attempt held the session; nothing was tried.
    Refused,
}

enum AvatarAttempt {
    Delivered,
    FallBack,
    Refused,
    /// The session was closed while the job was pending.
    Closed,
}

pub struct FallbackCoordinator {
    session: Arc<SpeechSession>,
    avatar: Option<Arc<dyn AvatarJobApi>>,
    renderer: Arc<dyn MediaRenderer>,
    progress: watch::Sender<PlaybackProgress>,
    ledger: Mutex<HashMap<Uuid, DeliveryRecord>>,
}

impl FallbackCoordinator {
    pub fn new(
        session: Arc<SpeechSession>,
        avatar: Option<Arc<dyn AvatarJobApi>>,
        renderer: Arc<dyn MediaRenderer>,
    ) -> Self {
        let (progress, _) = watch::channel(PlaybackProgress::default());
        Self {
            session,
            avatar,
            renderer,
            progress,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    pub fn session(&self) -> &Arc<SpeechSession> {
        &self.session
    }

    pub fn avatar_available(&self) -> bool {
        self.avatar.is_some() && self.session.has_backend()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackProgress> {
        self.progress.subscribe()
    }

    pub fn progress(&self) -> PlaybackProgress {
        self.progress.borrow().clone()
    }

    pub fn delivery(&self, message_id: Uuid) -> Option<DeliveryRecord> {
        self.ledger.lock().get(&message_id).copied()
    }

    pub fn deliveries(&self) -> HashMap<Uuid, DeliveryRecord> {
        self.ledger.lock().clone()
    }

    /// Speaks `request` and returns whether any audio or video was delivered.
    pub async fn play(&self, request: PlaybackRequest) -> bool {
        let message_id = request.message_id;
        {
            let mut ledger = self.ledger.lock();
            if let Some(record) = ledger.get(&message_id) {
                debug!(%message_id, ?record, "Message already played; not synthesizing again");
                return matches!(record, DeliveryRecord::Delivered(_));
            }
            if self.session.is_closed() {
                debug!(%message_id, "Playback refused: speech session is closed");
                return false;
            }
            if self.session.is_speaking() {
                warn!(%message_id, "Playback refused: another message is still being spoken");
                return false;
            }
            ledger.insert(message_id, DeliveryRecord::InFlight);
        }

        self.progress.send_replace(PlaybackProgress {
            message_id: Some(message_id),
            ..PlaybackProgress::default()
        });

        let result = self.run_pipeline(&request).await;

        let mut ledger = self.ledger.lock();
        match result {
            PipelineResult::Delivered(source) => {
                ledger.insert(message_id, DeliveryRecord::Delivered(source));
                drop(ledger);
                info!(%message_id, ?source, "Playback delivered");
                self.set_phase(PlaybackPhase::Delivered);
                true
            }
            PipelineResult::NoAudio => {
                ledger.insert(message_id, DeliveryRecord::NoAudio);
                drop(ledger);
                self.set_phase(PlaybackPhase::NoAudio);
                false
            }
            PipelineResult::Refused => {
                ledger.remove(&message_id);
                drop(ledger);
                self.set_phase(PlaybackPhase::Idle);
                false
            }
        }
    }

    async fn run_pipeline(&self, request: &PlaybackRequest) -> PipelineResult {
        if request.use_avatar && self.session.has_backend() {
            if let Some(api) = &self.avatar {
                match self.try_avatar(api, request).await {
                    AvatarAttempt::Delivered => {
                        return PipelineResult::Delivered(DeliveredSource::Avatar);
                    }
                    AvatarAttempt::Refused => return PipelineResult::Refused,
                    AvatarAttempt::Closed => return PipelineResult::NoAudio,
                    AvatarAttempt::FallBack => {}
                }
            }
        }

        self.set_phase(PlaybackPhase::PlayingAudio);
        match self.session.speak(&request.text).await {
            SpeakOutcome::Completed(audio) => {
                match self.renderer.present_audio(request.message_id, audio).await {
                    Ok(()) => PipelineResult::Delivered(DeliveredSource::Plain),
                    Err(e) => {
                        self.notice(format!("Could not deliver audio: {e}"));
                        PipelineResult::NoAudio
                    }
                }
            }
            SpeakOutcome::Busy => PipelineResult::Refused,
            SpeakOutcome::Unavailable => {
                self.notice("Text-to-speech not available. Please check your configuration.");
                PipelineResult::NoAudio
            }
            SpeakOutcome::TimedOut => {
                self.notice("Speech synthesis timed out.");
                PipelineResult::NoAudio
            }
            SpeakOutcome::Cancelled | SpeakOutcome::Closed => PipelineResult::NoAudio,
            SpeakOutcome::Failed(reason) => {
                self.notice(format!("Text-to-speech error: {reason}"));
                PipelineResult::NoAudio
            }
        }
    }

    async fn try_avatar(
        &self,
        api: &Arc<dyn AvatarJobApi>,
        request: &PlaybackRequest,
    ) -> AvatarAttempt {
        let guard = match self.session.begin(OperationKind::Avatar) {
            Ok(guard) => guard,
            Err(BeginError::Busy) => return AvatarAttempt::Refused,
            Err(BeginError::Closed) => return AvatarAttempt::Closed,
        };
        let timings = self.session.timings();
        let job_id = Uuid::new_v4().to_string();

        self.set_phase(PlaybackPhase::SubmittingAvatar);
        if !api.submit(&job_id, &request.text, &request.profile).await {
            self.notice("Avatar synthesis failed. Using audio-only.");
            return AvatarAttempt::FallBack;
        }

        let job = AvatarJob::submitted(job_id.clone(), timings.avatar_timeout);
        let outcome =
            run_poll_loop(api.as_ref(), job, guard.signals(), &timings, &self.progress).await;

        match outcome {
            PollOutcome::Succeeded { result_url } => {
                match self
                    .renderer
                    .present_video(request.message_id, &result_url)
                    .await
                {
                    Ok(()) => AvatarAttempt::Delivered,
                    Err(e) => {
                        self.notice(format!(
                            "Failed to display video: {e}. Falling back to audio-only."
                        ));
                        AvatarAttempt::FallBack
                    }
                }
            }
            PollOutcome::Failed { reason } => {
                self.notice(format!("Avatar synthesis failed: {reason}. Using audio-only."));
                AvatarAttempt::FallBack
            }
            PollOutcome::TimedOut => {
                self.notice("Avatar synthesis taking longer than expected. Using audio-only.");
                abandon_job(api, job_id);
                AvatarAttempt::FallBack
            }
            PollOutcome::Skipped { .. } if self.session.is_closed() => {
                abandon_job(api, job_id);
                AvatarAttempt::Closed
            }
            PollOutcome::Skipped { reason } => {
                match reason {
                    SkipReason::UserSkip => {
                        self.notice("Continuing with audio-only as requested.")
                    }
                    SkipReason::Stopped => self.notice("Avatar stopped. Using audio-only."),
                }
                abandon_job(api, job_id);
                AvatarAttempt::FallBack
            }
        }
    }

    fn set_phase(&self, phase: PlaybackPhase) {
        self.progress.send_modify(|p| {
            p.phase = phase;
            if phase != PlaybackPhase::GeneratingAvatar {
                p.skip_offered = false;
            }
        });
    }

    fn notice(&self, text: impl Into<String>) {
        let text = text.into();
        warn!("{text}");
        self.progress.send_modify(|p| p.notice = Some(text));
    }
}

/// Asks the service to drop a job we no longer wait for. Never awaited.
fn abandon_job(api: &Arc<dyn AvatarJobApi>, job_id: String) {
    let api = Arc::clone(api);
    tokio::spawn(async move {
        if let Err(e) = api.cancel(&job_id).await {
            debug!(job_id = %job_id, "Avatar job cancel not acknowledged: {e}");
        }
    });
}
