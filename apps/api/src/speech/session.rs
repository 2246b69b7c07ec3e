//! Per-conversation playback state and the plain TTS path.
//!
//! `SpeechSessionState` is only ever mutated by `SpeechSession` methods. Every
//! attempt (avatar or plain) starts through [`SpeechSession::begin`] and ends
//! when its [`OperationGuard`] is dropped, so cleanup runs on every exit path.
//! Locks are never held across an `.await`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::speech::error::SpeechError;
use crate::speech::synthesizer::{SpeechSynthesizer, SynthesisResult, SynthesizerFactory};
use crate::speech::PlaybackTimings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Avatar,
    PlainTts,
}

/// Out-of-band signals shared by the session and the flow driving an attempt.
#[derive(Debug, Default)]
pub struct OperationSignals {
    cancel: CancellationToken,
    skip: CancellationToken,
    skip_offered: AtomicBool,
}

impl OperationSignals {
    /// Fires when `stop` abandons the attempt.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Fires when the user asks to skip an avatar job in favour of audio.
    pub fn skip_token(&self) -> &CancellationToken {
        &self.skip
    }

    /// Marks the skip as available; before this, skip requests are ignored.
    pub fn offer_skip(&self) {
        self.skip_offered.store(true, Ordering::Release);
    }

    pub fn skip_offered(&self) -> bool {
        self.skip_offered.load(Ordering::Acquire)
    }
}

/// Handle to the outstanding synthesis operation.
#[derive(Debug, Clone)]
pub struct ActiveOperation {
    pub id: Uuid,
    pub kind: OperationKind,
    signals: Arc<OperationSignals>,
}

/// Mutable playback state of one conversation.
///
/// `active_operation.is_some()` ⇔ `is_speaking`, except while `stop` has
/// abandoned an attempt whose owner has not unwound yet.
#[derive(Debug, Default)]
pub struct SpeechSessionState {
    pub is_speaking: bool,
    pub cancel_requested: bool,
    pub active_operation: Option<ActiveOperation>,
    /// Set once by `close`; no attempt may start afterwards.
    pub closed: bool,
}

/// Read-only copy of the state for display. May be stale by one poll tick.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub is_speaking: bool,
    pub cancel_requested: bool,
    pub active_kind: Option<OperationKind>,
    pub active_id: Option<Uuid>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BeginError {
    #[error("A playback attempt is already in progress")]
    Busy,
    #[error("The speech session has been closed")]
    Closed,
}

/// How a plain TTS attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeakOutcome {
    Completed(Bytes),
    Cancelled,
    TimedOut,
    Failed(String),
    /// No synthesis backend is configured.
    Unavailable,
    /// Another attempt was still outstanding.
    Busy,
    /// The session was closed; nothing was synthesized.
    Closed,
}

impl SpeakOutcome {
    /// `true` only on confirmed successful completion.
    pub fn succeeded(&self) -> bool {
        matches!(self, SpeakOutcome::Completed(_))
    }
}

pub struct SpeechSession {
    state: Mutex<SpeechSessionState>,
    synthesizer: Mutex<Option<Arc<dyn SpeechSynthesizer>>>,
    factory: Option<Arc<dyn SynthesizerFactory>>,
    timings: PlaybackTimings,
}

impl SpeechSession {
    /// Builds the session and its first synthesizer handle.
    /// A factory that fails here leaves the session without a backend.
    pub fn new(factory: Option<Arc<dyn SynthesizerFactory>>, timings: PlaybackTimings) -> Self {
        let synthesizer = factory.as_ref().and_then(|f| match f.create() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("Speech synthesizer unavailable: {e}");
                None
            }
        });

        Self {
            state: Mutex::new(SpeechSessionState::default()),
            synthesizer: Mutex::new(synthesizer),
            factory,
            timings,
        }
    }

    pub fn has_backend(&self) -> bool {
        self.synthesizer.lock().is_some()
    }

    pub fn is_speaking(&self) -> bool {
        self.state.lock().is_speaking
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn timings(&self) -> PlaybackTimings {
        self.timings
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock();
        SessionSnapshot {
            is_speaking: state.is_speaking,
            cancel_requested: state.cancel_requested,
            active_kind: state.active_operation.as_ref().map(|op| op.kind),
            active_id: state.active_operation.as_ref().map(|op| op.id),
        }
    }

    /// Registers a new attempt. Refused while another attempt is outstanding.
    pub fn begin(&self, kind: OperationKind) -> Result<OperationGuard<'_>, BeginError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(BeginError::Closed);
        }
        if state.is_speaking {
            return Err(BeginError::Busy);
        }

        let operation = ActiveOperation {
            id: Uuid::new_v4(),
            kind,
            signals: Arc::new(OperationSignals::default()),
        };
        state.is_speaking = true;
        state.cancel_requested = false;
        state.active_operation = Some(operation.clone());
        debug!(operation_id = %operation.id, ?kind, "Playback attempt started");

        Ok(OperationGuard {
            session: self,
            operation,
        })
    }

    /// Speaks `text` through the plain TTS backend.
    ///
    /// Resolves on completion, on `stop`, or when the TTS deadline passes.
    pub async fn speak(&self, text: &str) -> SpeakOutcome {
        if self.is_closed() {
            debug!("Speech session closed; not speaking");
            return SpeakOutcome::Closed;
        }
        let Some(synthesizer) = self.current_synthesizer() else {
            warn!("Text-to-speech not available: speech service is not configured");
            return SpeakOutcome::Unavailable;
        };
        let guard = match self.begin(OperationKind::PlainTts) {
            Ok(guard) => guard,
            Err(BeginError::Closed) => return SpeakOutcome::Closed,
            Err(e @ BeginError::Busy) => {
                warn!("{e}");
                return SpeakOutcome::Busy;
            }
        };
        let cancel = guard.signals().cancel_token().clone();

        let speaker = Arc::clone(&synthesizer);
        let text = text.to_owned();
        let mut task = tokio::spawn(async move { speaker.speak_text(&text).await });

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                task.abort();
                SpeakOutcome::Cancelled
            }
            _ = tokio::time::sleep(self.timings.tts_timeout) => {
                task.abort();
                if let Err(e) = synthesizer.stop_speaking().await {
                    debug!("Stop after TTS timeout failed: {e}");
                }
                warn!(timeout = ?self.timings.tts_timeout, "Text-to-speech timed out");
                SpeakOutcome::TimedOut
            }
            joined = &mut task => match joined {
                Ok(Ok(SynthesisResult::Completed(audio))) => SpeakOutcome::Completed(audio),
                Ok(Ok(SynthesisResult::Canceled { reason })) => {
                    if !guard.cancel_requested() {
                        warn!("Speech synthesis stopped: {reason}");
                    }
                    SpeakOutcome::Cancelled
                }
                Ok(Err(e)) => {
                    if !guard.cancel_requested() {
                        warn!("Text-to-speech error: {e}");
                    }
                    SpeakOutcome::Failed(e.to_string())
                }
                Err(e) => SpeakOutcome::Failed(format!("synthesis task ended unexpectedly: {e}")),
            },
        };

        drop(guard);
        outcome
    }

    /// Abandons the active attempt. Returns `false` when nothing was active.
    ///
    /// `is_speaking` is already `false` by the time the provider is contacted.
    pub async fn stop(&self) -> bool {
        let operation = {
            let mut state = self.state.lock();
            if !state.is_speaking && state.active_operation.is_none() {
                return false;
            }
            state.cancel_requested = true;
            state.is_speaking = false;
            state.active_operation.take()
        };

        let Some(operation) = operation else {
            return true;
        };
        operation.signals.cancel.cancel();
        info!(operation_id = %operation.id, kind = ?operation.kind, "Speech stop requested");

        if operation.kind == OperationKind::PlainTts {
            if let Some(synthesizer) = self.current_synthesizer() {
                if let Err(e) = synthesizer.stop_speaking().await {
                    warn!("Synthesizer did not accept stop ({e}); replacing handle");
                    if let Err(e) = self.replace_synthesizer() {
                        warn!("Could not replace synthesizer: {e}");
                    }
                }
            }
        }
        true
    }

    /// Shuts the session down: abandons the active attempt and refuses every
    /// later one. Returns whether an attempt was active.
    pub async fn close(&self) -> bool {
        {
            let mut state = self.state.lock();
            if state.closed {
                return false;
            }
            state.closed = true;
        }
        info!("Speech session closed");
        self.stop().await
    }

    /// Skips a pending avatar job in favour of audio-only playback.
    /// Only honoured once the poll loop has offered the skip.
    pub fn skip_to_audio(&self) -> bool {
        let state = self.state.lock();
        match &state.active_operation {
            Some(op) if op.kind == OperationKind::Avatar && op.signals.skip_offered() => {
                op.signals.skip.cancel();
                info!(operation_id = %op.id, "Skip to audio-only requested");
                true
            }
            _ => false,
        }
    }

    /// Swaps in a fresh synthesizer handle from the factory and closes the old one,
    /// so a stuck provider operation cannot block later attempts.
    pub fn replace_synthesizer(&self) -> Result<(), SpeechError> {
        let factory = self.factory.as_ref().ok_or_else(|| {
            SpeechError::Configuration("no synthesizer factory configured".to_string())
        })?;
        let fresh = factory.create()?;
        let old = self.synthesizer.lock().replace(fresh);
        if let Some(old) = old {
            old.close();
        }
        info!("Speech synthesizer handle replaced");
        Ok(())
    }

    fn current_synthesizer(&self) -> Option<Arc<dyn SpeechSynthesizer>> {
        self.synthesizer.lock().clone()
    }

    /// Clears the state, unless a newer attempt has already taken over.
    fn finish(&self, id: Uuid) {
        let mut state = self.state.lock();
        if state.active_operation.as_ref().is_some_and(|op| op.id != id) {
            return;
        }
        state.is_speaking = false;
        state.cancel_requested = false;
        state.active_operation = None;
        debug!(operation_id = %id, "Playback attempt finished");
    }
}

/// Ownership of one registered attempt; dropping it releases the session.
pub struct OperationGuard<'a> {
    session: &'a SpeechSession,
    operation: ActiveOperation,
}

impl OperationGuard<'_> {
    pub fn id(&self) -> Uuid {
        self.operation.id
    }

    pub fn signals(&self) -> &Arc<OperationSignals> {
        &self.operation.signals
    }

    /// `true` once `stop` has abandoned this attempt.
    pub fn cancel_requested(&self) -> bool {
        self.operation.signals.cancel.is_cancelled()
    }
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        self.session.finish(self.operation.id);
    }
}
