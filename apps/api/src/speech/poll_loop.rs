//! Interruptible poll loop for avatar jobs.
//!
//! [`PollMachine`] is the pure state machine: it is fed status reports,
//! skip/stop signals and the deadline, and decides when the job is done.
//! [`run_poll_loop`] is the async driver that performs the remote checks at a
//! fixed cadence and multiplexes them with the user's signals. Display code
//! follows along through a [`PollObserver`].

use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval, sleep_until, Instant, Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::speech::avatar::{
    AvatarJob, AvatarJobApi, AvatarJobStatus, JobStatusReport, RemoteJobStatus,
};
use crate::speech::error::SpeechError;
use crate::speech::session::OperationSignals;
use crate::speech::PlaybackTimings;

/// Progress shown before the job reaches a terminal state.
pub const PROGRESS_CAP: f32 = 0.95;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Waiting,
    SkipOffered,
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

impl PollState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, PollState::Waiting | PollState::SkipOffered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The user chose audio-only after the skip was offered.
    UserSkip,
    /// `stop` abandoned the attempt.
    Stopped,
}

/// How the loop resolved. `Skipped` means "abandon the avatar, use plain audio";
/// it is not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Succeeded { result_url: String },
    Failed { reason: String },
    TimedOut,
    Skipped { reason: SkipReason },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Continue,
    Done(PollOutcome),
}

/// State transition emitted to observers after every loop event.
#[derive(Debug, Clone, Serialize)]
pub struct PollEvent {
    pub job_id: String,
    pub state: PollState,
    pub progress: f32,
    pub remote_status: &'static str,
    pub elapsed: Duration,
}

pub trait PollObserver: Send + Sync {
    fn on_event(&self, event: &PollEvent);
}

impl<F> PollObserver for F
where
    F: Fn(&PollEvent) + Send + Sync,
{
    fn on_event(&self, event: &PollEvent) {
        self(event)
    }
}

/// The avatar poll state machine. Pure: time is passed in, no I/O.
#[derive(Debug)]
pub struct PollMachine {
    state: PollState,
    job: AvatarJob,
    timeout: Duration,
    skip_offer_after: Duration,
    progress: f32,
    remote_status: &'static str,
    elapsed: Duration,
    outcome: Option<PollOutcome>,
}

impl PollMachine {
    pub fn new(job: AvatarJob, timings: &PlaybackTimings) -> Self {
        Self {
            state: PollState::Waiting,
            job,
            timeout: timings.avatar_timeout,
            skip_offer_after: timings.skip_offer_after,
            progress: 0.0,
            remote_status: RemoteJobStatus::NotStarted.as_str(),
            elapsed: Duration::ZERO,
            outcome: None,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn job(&self) -> &AvatarJob {
        &self.job
    }

    pub fn event(&self) -> PollEvent {
        PollEvent {
            job_id: self.job.id.clone(),
            state: self.state,
            progress: self.progress,
            remote_status: self.remote_status,
            elapsed: self.elapsed,
        }
    }

    /// Feeds one status check taken `elapsed` after submission.
    pub fn observe(
        &mut self,
        report: Result<JobStatusReport, SpeechError>,
        elapsed: Duration,
    ) -> Step {
        if let Some(outcome) = &self.outcome {
            return Step::Done(outcome.clone());
        }
        self.elapsed = elapsed;

        let report = match report {
            Ok(report) => report,
            Err(e) => {
                return self.finish(PollOutcome::Failed {
                    reason: format!("status check failed: {e}"),
                })
            }
        };

        self.remote_status = report.status.as_str();
        let estimate = if self.timeout.is_zero() {
            PROGRESS_CAP
        } else {
            (elapsed.as_secs_f32() / self.timeout.as_secs_f32()).min(PROGRESS_CAP)
        };
        self.progress = self.progress.max(estimate);

        match report.status {
            RemoteJobStatus::Succeeded => {
                return match report.result_url {
                    Some(result_url) => self.finish(PollOutcome::Succeeded { result_url }),
                    None => self.finish(PollOutcome::Failed {
                        reason: "job succeeded without a result URL".to_string(),
                    }),
                };
            }
            RemoteJobStatus::Failed => {
                return self.finish(PollOutcome::Failed {
                    reason: report
                        .error_message
                        .unwrap_or_else(|| "Unknown error".to_string()),
                });
            }
            RemoteJobStatus::Running => {
                if self.job.status != AvatarJobStatus::Running {
                    if let Err(e) = self.job.advance(AvatarJobStatus::Running, None) {
                        warn!(job_id = %self.job.id, "{e}");
                    }
                }
            }
            RemoteJobStatus::NotStarted | RemoteJobStatus::Unknown => {}
        }

        if elapsed >= self.timeout {
            return self.finish(PollOutcome::TimedOut);
        }
        if self.state == PollState::Waiting && elapsed >= self.skip_offer_after {
            self.state = PollState::SkipOffered;
        }
        Step::Continue
    }

    /// The user's skip request; ignored until the skip has been offered.
    pub fn skip(&mut self) -> Step {
        match self.state {
            PollState::SkipOffered => self.finish(PollOutcome::Skipped {
                reason: SkipReason::UserSkip,
            }),
            _ => self.current(),
        }
    }

    /// `stop` was called on the session.
    pub fn stop(&mut self) -> Step {
        self.finish(PollOutcome::Skipped {
            reason: SkipReason::Stopped,
        })
    }

    /// The deadline passed without a terminal status.
    pub fn expire(&mut self) -> Step {
        self.finish(PollOutcome::TimedOut)
    }

    fn current(&self) -> Step {
        match &self.outcome {
            Some(outcome) => Step::Done(outcome.clone()),
            None => Step::Continue,
        }
    }

    fn finish(&mut self, outcome: PollOutcome) -> Step {
        if let Some(existing) = &self.outcome {
            return Step::Done(existing.clone());
        }

        let (state, job_status, result_url) = match &outcome {
            PollOutcome::Succeeded { result_url } => (
                PollState::Succeeded,
                AvatarJobStatus::Succeeded,
                Some(result_url.clone()),
            ),
            PollOutcome::Failed { .. } => (PollState::Failed, AvatarJobStatus::Failed, None),
            PollOutcome::TimedOut => (PollState::TimedOut, AvatarJobStatus::TimedOut, None),
            PollOutcome::Skipped { .. } => (PollState::Skipped, AvatarJobStatus::Skipped, None),
        };
        self.state = state;
        if let Err(e) = self.job.advance(job_status, result_url) {
            warn!(job_id = %self.job.id, "{e}");
        }
        if state == PollState::Succeeded {
            self.progress = 1.0;
        }
        self.outcome = Some(outcome.clone());
        Step::Done(outcome)
    }
}

/// Drives `job` to a terminal state.
///
/// Status checks start at a fixed cadence regardless of how long each one
/// takes. `stop` and the deadline interrupt an in-flight check; a stop observed
/// after a report arrives still wins over that report.
pub async fn run_poll_loop(
    api: &dyn AvatarJobApi,
    job: AvatarJob,
    signals: &OperationSignals,
    timings: &PlaybackTimings,
    observer: &dyn PollObserver,
) -> PollOutcome {
    let job_id = job.id.clone();
    let started = Instant::now();
    let deadline = started + timings.avatar_timeout;
    let cancel = signals.cancel_token();
    let skip = signals.skip_token();

    let mut machine = PollMachine::new(job, timings);
    let mut ticker = interval(timings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    observer.on_event(&machine.event());

    loop {
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => machine.stop(),
            _ = skip.cancelled(), if machine.state() == PollState::SkipOffered => machine.skip(),
            _ = sleep_until(deadline) => machine.expire(),
            report = next_report(&mut ticker, api, &job_id) => {
                if cancel.is_cancelled() {
                    machine.stop()
                } else {
                    machine.observe(report, started.elapsed())
                }
            }
        };

        if machine.state() == PollState::SkipOffered && !signals.skip_offered() {
            signals.offer_skip();
            info!(job_id = %job_id, "Avatar is taking a while; audio-only skip offered");
        }
        observer.on_event(&machine.event());

        if let Step::Done(outcome) = step {
            info!(
                job_id = %job_id,
                state = ?machine.state(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Avatar poll loop finished"
            );
            return outcome;
        }
    }
}

async fn next_report(
    ticker: &mut Interval,
    api: &dyn AvatarJobApi,
    job_id: &str,
) -> Result<JobStatusReport, SpeechError> {
    ticker.tick().await;
    api.poll(job_id).await
}
