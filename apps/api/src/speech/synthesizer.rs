//! Plain text-to-speech provider.
//!
//! The session never talks to Azure directly: it holds an
//! `Arc<dyn SpeechSynthesizer>` built by a [`SynthesizerFactory`], and asks the
//! factory for a fresh handle whenever a stop request cannot be delivered.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::SpeechSettings;
use crate::speech::error::SpeechError;

/// Voice used for audio-only playback.
pub const TTS_VOICE: &str = "en-US-AriaNeural";
const OUTPUT_FORMAT: &str = "audio-24khz-48kbitrate-mono-mp3";
const USER_AGENT: &str = "career-buddy-api";

/// How a single synthesis call ended on the provider side.
#[derive(Debug, Clone, PartialEq)]
pub enum SynthesisResult {
    /// Audio was fully synthesized (MP3 bytes).
    Completed(Bytes),
    /// The provider stopped before producing audio.
    Canceled { reason: String },
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesizes `text` and resolves once the provider is done with it.
    async fn speak_text(&self, text: &str) -> Result<SynthesisResult, SpeechError>;

    /// Asks the provider to abandon the in-flight synthesis, if any.
    async fn stop_speaking(&self) -> Result<(), SpeechError>;

    /// Releases the handle. Called on a handle that has just been replaced.
    fn close(&self) {}
}

/// Builds synthesizer handles. Used once at session creation and again for
/// every forced replacement after a failed stop.
pub trait SynthesizerFactory: Send + Sync {
    fn create(&self) -> Result<Arc<dyn SpeechSynthesizer>, SpeechError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Azure REST synthesizer
// ────────────────────────────────────────────────────────────────────────────

pub fn tts_url(region: &str) -> String {
    format!("https://{region}.tts.speech.microsoft.com/cognitiveservices/v1")
}

/// Creates [`AzureSpeechSynthesizer`] handles that share one HTTP client.
#[derive(Clone)]
pub struct AzureSynthesizerFactory {
    client: Client,
    url: String,
    subscription_key: String,
    voice: String,
}

impl AzureSynthesizerFactory {
    pub fn new(client: Client, url: String, subscription_key: String) -> Self {
        Self {
            client,
            url,
            subscription_key,
            voice: TTS_VOICE.to_string(),
        }
    }

    /// Returns `None` unless both the subscription key and the region are configured.
    pub fn from_settings(client: Client, settings: &SpeechSettings) -> Option<Self> {
        let (key, region) = settings.tts_credentials()?;
        Some(Self::new(client, tts_url(region), key.to_string()))
    }
}

impl SynthesizerFactory for AzureSynthesizerFactory {
    fn create(&self) -> Result<Arc<dyn SpeechSynthesizer>, SpeechError> {
        Ok(Arc::new(AzureSpeechSynthesizer {
            client: self.client.clone(),
            url: self.url.clone(),
            subscription_key: self.subscription_key.clone(),
            voice: self.voice.clone(),
            in_flight: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One synthesizer handle. A stop cancels the request currently in flight;
/// once closed, the handle rejects every call with [`SpeechError::Closed`].
pub struct AzureSpeechSynthesizer {
    client: Client,
    url: String,
    subscription_key: String,
    voice: String,
    in_flight: Mutex<Option<CancellationToken>>,
    closed: AtomicBool,
}

impl AzureSpeechSynthesizer {
    async fn request_audio(&self, text: &str) -> Result<Bytes, SpeechError> {
        let response = self
            .client
            .post(&self.url)
            .header("Ocp-Apim-Subscription-Key", &self.subscription_key)
            .header("Content-Type", "application/ssml+xml")
            .header("X-Microsoft-OutputFormat", OUTPUT_FORMAT)
            .header("User-Agent", USER_AGENT)
            .timeout(Duration::from_secs(30))
            .body(build_ssml(&self.voice, text))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::api(status.as_u16(), &body));
        }

        let audio = response.bytes().await?;
        debug!(bytes = audio.len(), "TTS synthesis completed");
        Ok(audio)
    }
}

#[async_trait]
impl SpeechSynthesizer for AzureSpeechSynthesizer {
    async fn speak_text(&self, text: &str) -> Result<SynthesisResult, SpeechError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SpeechError::Closed);
        }

        let token = CancellationToken::new();
        *self.in_flight.lock() = Some(token.clone());

        let result = tokio::select! {
            _ = token.cancelled() => Ok(SynthesisResult::Canceled {
                reason: "stopped".to_string(),
            }),
            audio = self.request_audio(text) => audio.map(SynthesisResult::Completed),
        };

        // the session serializes calls, so the slot still holds this call's token
        self.in_flight.lock().take();
        result
    }

    async fn stop_speaking(&self) -> Result<(), SpeechError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SpeechError::Closed);
        }
        if let Some(token) = self.in_flight.lock().take() {
            token.cancel();
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(token) = self.in_flight.lock().take() {
            token.cancel();
        }
    }
}

/// Wraps plain text in the SSML envelope Azure expects.
fn build_ssml(voice: &str, text: &str) -> String {
    format!(
        "<speak version='1.0' xmlns='http://www.w3.org/2001/10/synthesis' xml:lang='en-US'>\
         <voice name='{voice}'>{}</voice></speak>",
        escape_xml(text)
    )
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::post, Router};

    async fn spawn_tts_stub(delay: Duration) -> String {
        let app = Router::new().route(
            "/cognitiveservices/v1",
            post(move |headers: HeaderMap, body: String| async move {
                tokio::time::sleep(delay).await;
                assert_eq!(
                    headers.get("Content-Type").and_then(|v| v.to_str().ok()),
                    Some("application/ssml+xml")
                );
                assert!(body.contains("en-US-AriaNeural"));
                Bytes::from_static(b"ID3-fake-mp3")
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/cognitiveservices/v1")
    }

    fn factory(url: String) -> AzureSynthesizerFactory {
        AzureSynthesizerFactory::new(Client::new(), url, "test-key".to_string())
    }

    #[test]
    fn test_ssml_escapes_markup() {
        let ssml = build_ssml(TTS_VOICE, "Tell me about <R&D> \"wins\"");
        assert!(ssml.contains("Tell me about &lt;R&amp;D&gt; &quot;wins&quot;"));
        assert!(ssml.contains("<voice name='en-US-AriaNeural'>"));
    }

    #[test]
    fn test_tts_url_uses_region_host() {
        assert_eq!(
            tts_url("westeurope"),
            "https://westeurope.tts.speech.microsoft.com/cognitiveservices/v1"
        );
    }

    #[test]
    fn test_factory_requires_region() {
        let settings = SpeechSettings {
            subscription_key: Some("key".to_string()),
            region: None,
            endpoint: String::new(),
        };
        assert!(AzureSynthesizerFactory::from_settings(Client::new(), &settings).is_none());
    }

    #[tokio::test]
    async fn test_speak_text_returns_audio() {
        let url = spawn_tts_stub(Duration::ZERO).await;
        let synth = factory(url).create().unwrap();
        let result = synth.speak_text("Hello").await.unwrap();
        assert_eq!(
            result,
            SynthesisResult::Completed(Bytes::from_static(b"ID3-fake-mp3"))
        );
    }

    #[tokio::test]
    async fn test_stop_speaking_cancels_in_flight_request() {
        let url = spawn_tts_stub(Duration::from_secs(5)).await;
        let synth = factory(url).create().unwrap();

        let speaker = Arc::clone(&synth);
        let call = tokio::spawn(async move { speaker.speak_text("A long question").await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        synth.stop_speaking().await.unwrap();

        let result = call.await.unwrap().unwrap();
        assert!(matches!(result, SynthesisResult::Canceled { .. }));
    }

    #[tokio::test]
    async fn test_closed_handle_rejects_calls() {
        let synth = factory("http://127.0.0.1:9/unused".to_string())
            .create()
            .unwrap();
        synth.close();
        assert!(matches!(synth.stop_speaking().await, Err(SpeechError::Closed)));
        assert!(matches!(synth.speak_text("hi").await, Err(SpeechError::Closed)));
    }
}
