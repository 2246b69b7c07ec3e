//! In-memory providers for exercising the speech layer under paused time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::speech::avatar::{AvatarJobApi, AvatarProfile, JobStatusReport, RemoteJobStatus};
use crate::speech::error::SpeechError;
use crate::speech::synthesizer::{SpeechSynthesizer, SynthesisResult, SynthesizerFactory};

pub const STUB_AUDIO: &[u8] = b"ID3-stub-audio";

#[derive(Debug, Clone, Copy)]
pub enum StubSpeech {
    /// Completes with audio after the given delay.
    Complete(Duration),
    /// Never completes on its own.
    Hang,
    /// Fails with an API error.
    Fail,
}

pub struct StubSynthesizer {
    behavior: StubSpeech,
    fail_stop: bool,
    calls: AtomicUsize,
    stops: AtomicUsize,
    closed: AtomicBool,
}

impl StubSynthesizer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechSynthesizer for StubSynthesizer {
    async fn speak_text(&self, _text: &str) -> Result<SynthesisResult, SpeechError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            StubSpeech::Complete(delay) => {
                tokio::time::sleep(delay).await;
                Ok(SynthesisResult::Completed(Bytes::from_static(STUB_AUDIO)))
            }
            StubSpeech::Hang => std::future::pending().await,
            StubSpeech::Fail => Err(SpeechError::api(500, "synthesis backend exploded")),
        }
    }

    async fn stop_speaking(&self) -> Result<(), SpeechError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            Err(SpeechError::api(500, "stop not supported"))
        } else {
            Ok(())
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub struct StubFactory {
    behavior: StubSpeech,
    fail_stop: bool,
    created: Mutex<Vec<Arc<StubSynthesizer>>>,
}

impl StubFactory {
    pub fn new(behavior: StubSpeech) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            fail_stop: false,
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn with_failing_stop(behavior: StubSpeech) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            fail_stop: true,
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn latest(&self) -> Arc<StubSynthesizer> {
        self.created
            .lock()
            .last()
            .cloned()
            .expect("factory has not created a synthesizer")
    }

    /// Total synthesis calls across every handle this factory built.
    pub fn total_calls(&self) -> usize {
        self.created.lock().iter().map(|s| s.calls()).sum()
    }
}

impl SynthesizerFactory for StubFactory {
    fn create(&self) -> Result<Arc<dyn SpeechSynthesizer>, SpeechError> {
        let synth = Arc::new(StubSynthesizer {
            behavior: self.behavior,
            fail_stop: self.fail_stop,
            calls: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });
        self.created.lock().push(Arc::clone(&synth));
        Ok(synth)
    }
}

/// Scripted avatar job API. Poll answers are consumed in order; once the
/// script runs out, `repeat` is returned forever.
pub struct StubAvatarApi {
    accept: bool,
    script: Mutex<VecDeque<Result<JobStatusReport, SpeechError>>>,
    repeat: JobStatusReport,
    poll_delay: Duration,
    stop_before_report: Mutex<Option<CancellationToken>>,
    submitted: Mutex<Vec<String>>,
    polls: AtomicUsize,
    cancels: Mutex<Vec<String>>,
}

impl StubAvatarApi {
    pub fn new(accept: bool, script: Vec<Result<JobStatusReport, SpeechError>>) -> Arc<Self> {
        Self::slow(accept, script, Duration::ZERO)
    }

    /// Every status check takes `poll_delay` to answer.
    pub fn slow(
        accept: bool,
        script: Vec<Result<JobStatusReport, SpeechError>>,
        poll_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            accept,
            script: Mutex::new(script.into()),
            repeat: JobStatusReport::running(),
            poll_delay,
            stop_before_report: Mutex::new(None),
            submitted: Mutex::new(Vec::new()),
            polls: AtomicUsize::new(0),
            cancels: Mutex::new(Vec::new()),
        })
    }

    /// Cancels `token` just before the next status report is handed back,
    /// so the report and the stop arrive together.
    pub fn stop_before_next_report(&self, token: CancellationToken) {
        *self.stop_before_report.lock() = Some(token);
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<String> {
        self.submitted.lock().clone()
    }

    pub fn cancels(&self) -> Vec<String> {
        self.cancels.lock().clone()
    }
}

#[async_trait]
impl AvatarJobApi for StubAvatarApi {
    async fn submit(&self, _job_id: &str, text: &str, _profile: &AvatarProfile) -> bool {
        self.submitted.lock().push(text.to_string());
        self.accept
    }

    async fn poll(&self, _job_id: &str) -> Result<JobStatusReport, SpeechError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if !self.poll_delay.is_zero() {
            tokio::time::sleep(self.poll_delay).await;
        }
        if let Some(token) = self.stop_before_report.lock().take() {
            token.cancel();
        }
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(self.repeat.clone()))
    }

    async fn cancel(&self, job_id: &str) -> Result<(), SpeechError> {
        self.cancels.lock().push(job_id.to_string());
        Ok(())
    }
}

pub fn succeeded(url: &str) -> Result<JobStatusReport, SpeechError> {
    Ok(JobStatusReport {
        status: RemoteJobStatus::Succeeded,
        result_url: Some(url.to_string()),
        error_message: None,
    })
}

pub fn failed(message: &str) -> Result<JobStatusReport, SpeechError> {
    Ok(JobStatusReport {
        status: RemoteJobStatus::Failed,
        result_url: None,
        error_message: Some(message.to_string()),
    })
}
