use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use reqwest::Url;
use uuid::Uuid;

use crate::speech::error::SpeechError;

/// What the user receives for one assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveredMedia {
    Video { url: String },
    Audio { bytes: Bytes },
}

/// Presents synthesized media. A failure here makes the coordinator fall back
/// to the next strategy rather than report an error.
#[async_trait]
pub trait MediaRenderer: Send + Sync {
    async fn present_video(&self, message_id: Uuid, url: &str) -> Result<(), SpeechError>;
    async fn present_audio(&self, message_id: Uuid, audio: Bytes) -> Result<(), SpeechError>;
}

/// In-memory store of delivered media, served back by the media route.
#[derive(Debug, Default)]
pub struct MediaLibrary {
    items: RwLock<HashMap<Uuid, DeliveredMedia>>,
}

impl MediaLibrary {
    pub fn get(&self, message_id: Uuid) -> Option<DeliveredMedia> {
        self.items.read().get(&message_id).cloned()
    }
}

#[async_trait]
impl MediaRenderer for MediaLibrary {
    async fn present_video(&self, message_id: Uuid, url: &str) -> Result<(), SpeechError> {
        let parsed = Url::parse(url)
            .map_err(|e| SpeechError::Render(format!("invalid video URL '{url}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SpeechError::Render(format!(
                "unsupported video URL scheme '{}'",
                parsed.scheme()
            )));
        }

        self.items.write().insert(
            message_id,
            DeliveredMedia::Video {
                url: parsed.to_string(),
            },
        );
        Ok(())
    }

    async fn present_audio(&self, message_id: Uuid, audio: Bytes) -> Result<(), SpeechError> {
        if audio.is_empty() {
            return Err(SpeechError::Render("synthesizer returned no audio".to_string()));
        }
        self.items
            .write()
            .insert(message_id, DeliveredMedia::Audio { bytes: audio });
        Ok(())
    }
}
