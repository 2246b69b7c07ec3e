//! Speech orchestration for interview practice.
//!
//! An assistant message is spoken through a fallback chain:
//! avatar video job → plain TTS → no audio. The avatar job is driven by an
//! interruptible poll loop, and any caller may stop the active attempt through
//! the per-conversation [`SpeechSession`].
//!
//! Flow: `FallbackCoordinator::play` → `AvatarJobApi::submit` → `run_poll_loop`
//!       → (on any non-success) `SpeechSession::speak`.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::config::SpeechSettings;

pub mod avatar;
pub mod coordinator;
pub mod error;
pub mod media;
pub mod poll_loop;
pub mod session;
pub mod synthesizer;
#[cfg(test)]
pub(crate) mod testing;

pub use avatar::{AvatarJobApi, AvatarJobClient, AvatarProfile};
pub use coordinator::{
    DeliveredSource, DeliveryRecord, FallbackCoordinator, PlaybackProgress, PlaybackRequest,
};
pub use error::SpeechError;
pub use media::{DeliveredMedia, MediaLibrary};
pub use session::SpeechSession;
pub use synthesizer::{AzureSynthesizerFactory, SynthesizerFactory};

/// Hard upper bounds and cadences for one playback attempt.
///
/// Every bound is enforced locally by wall-clock comparison, never by the remote service.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackTimings {
    /// Deadline for a single plain TTS call.
    pub tts_timeout: Duration,
    /// Deadline for an avatar job, measured from submission.
    pub avatar_timeout: Duration,
    /// Fixed interval between remote status checks.
    pub poll_interval: Duration,
    /// Elapsed time after which the user may skip to audio-only.
    pub skip_offer_after: Duration,
}

impl Default for PlaybackTimings {
    fn default() -> Self {
        Self {
            tts_timeout: Duration::from_secs(30),
            avatar_timeout: Duration::from_secs(180),
            poll_interval: Duration::from_secs(3),
            skip_offer_after: Duration::from_secs(15),
        }
    }
}

/// Speech backends shared by every conversation. Each conversation gets its own
/// [`SpeechSession`] and [`FallbackCoordinator`] built from these.
#[derive(Clone)]
pub struct SpeechServices {
    synthesizer_factory: Option<Arc<dyn SynthesizerFactory>>,
    avatar: Option<Arc<dyn AvatarJobApi>>,
    timings: PlaybackTimings,
}

/// Per-conversation speech state.
#[derive(Clone)]
pub struct SpeechConversation {
    pub coordinator: Arc<FallbackCoordinator>,
    pub media: Arc<MediaLibrary>,
}

impl SpeechServices {
    pub fn new(
        synthesizer_factory: Option<Arc<dyn SynthesizerFactory>>,
        avatar: Option<Arc<dyn AvatarJobApi>>,
        timings: PlaybackTimings,
    ) -> Self {
        Self {
            synthesizer_factory,
            avatar,
            timings,
        }
    }

    /// Plain TTS needs key and region; the avatar client only needs the key.
    pub fn from_settings(client: Client, settings: &SpeechSettings) -> Self {
        let synthesizer_factory = AzureSynthesizerFactory::from_settings(client.clone(), settings)
            .map(|f| Arc::new(f) as Arc<dyn SynthesizerFactory>);
        let avatar = settings.subscription_key.as_ref().map(|key| {
            Arc::new(AvatarJobClient::new(
                client,
                &settings.endpoint,
                Some(key.clone()),
            )) as Arc<dyn AvatarJobApi>
        });
        Self::new(synthesizer_factory, avatar, PlaybackTimings::default())
    }

    pub fn disabled() -> Self {
        Self::new(None, None, PlaybackTimings::default())
    }

    pub fn tts_available(&self) -> bool {
        self.synthesizer_factory.is_some()
    }

    /// Avatar video is only attempted when plain TTS is there to fall back on.
    pub fn avatar_available(&self) -> bool {
        self.avatar.is_some() && self.tts_available()
    }

    pub fn new_conversation(&self) -> SpeechConversation {
        let session = Arc::new(SpeechSession::new(
            self.synthesizer_factory.clone(),
            self.timings,
        ));
        let media = Arc::new(MediaLibrary::default());
        let coordinator = Arc::new(FallbackCoordinator::new(
            session,
            self.avatar.clone(),
            media.clone(),
        ));
        SpeechConversation { coordinator, media }
    }
}
