//! Job runner: the single audited failure boundary around every stage.
//!
//! One code path handles circuit consultation, timeout, panic containment,
//! retry, and state-machine bookkeeping identically for all stages, so
//! failure handling is audited once rather than copied per stage.

mod retry;

pub use retry::{RetryDecision, RetryPolicy};

use crate::breaker::{Admission, CircuitBreaker};
use crate::core::{JobResult, JobStatus, StageOutcome};
use crate::pipeline::StageSpec;
use crate::shutdown::ShutdownToken;
use crate::stages::StageContext;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Executes one stage spec once per cycle, producing a [`JobResult`].
///
/// The runner adds no side effects beyond timing, logging, and
/// state-machine bookkeeping; storage writes belong to the stage itself.
#[derive(Debug)]
pub struct JobRunner {
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    default_timeout: Duration,
    shutdown: ShutdownToken,
}

impl JobRunner {
    /// Creates a runner over the given breaker registry.
    #[must_use]
    pub fn new(
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        default_timeout: Duration,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            breaker,
            retry,
            default_timeout,
            shutdown,
        }
    }

    /// Returns the breaker registry this runner consults.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    /// Runs the stage once for this cycle.
    ///
    /// Never returns an error: every failure mode (stage error, panic,
    /// timeout, exhausted retry) becomes data in the returned [`JobResult`].
    pub async fn run(&self, spec: &StageSpec, mut ctx: StageContext) -> JobResult {
        let timeout = spec.timeout(self.default_timeout);
        let started = Utc::now();

        match self.breaker.admission(&spec.name) {
            Admission::Probe => {
                ctx.probe = true;
                ctx.attempt = 1;
                tracing::info!(stage = %spec.name, "circuit open, running half-open probe");

                let outcome = self.attempt(spec, &ctx, timeout).await;
                match outcome.status() {
                    JobStatus::Success | JobStatus::Partial => {
                        self.breaker.record_success(&spec.name);
                        JobResult::from_outcome(&spec.name, &outcome, started, 1).as_probe()
                    }
                    JobStatus::Failed => {
                        self.breaker.record_failure(&spec.name);
                        let message = outcome.error_message().unwrap_or("unknown error");
                        tracing::warn!(stage = %spec.name, error = %message, "probe failed, circuit stays open");
                        JobResult::skipped(
                            &spec.name,
                            format!("circuit open (probe failed: {message})"),
                        )
                        .as_probe()
                    }
                    // The stage declined to run; no recovery signal either way.
                    JobStatus::Skipped => {
                        JobResult::from_outcome(&spec.name, &outcome, started, 1).as_probe()
                    }
                }
            }
            Admission::Normal => {
                let mut attempts: u32 = 1;
                let mut outcome = self.attempt(spec, &ctx, timeout).await;

                while outcome.is_failure() {
                    match self.retry.decide(attempts) {
                        RetryDecision::Retry(delay) => {
                            tracing::warn!(
                                stage = %spec.name,
                                attempt = attempts,
                                delay_ms = delay.as_millis() as u64,
                                error = ?outcome.error_message(),
                                "stage failed, retrying after delay"
                            );
                            let interrupted = tokio::select! {
                                () = tokio::time::sleep(delay) => false,
                                () = self.shutdown.wait() => true,
                            };
                            if interrupted {
                                tracing::warn!(stage = %spec.name, "shutdown requested during retry delay, abandoning retry");
                                break;
                            }
                            attempts += 1;
                            ctx.attempt = attempts;
                            outcome = self.attempt(spec, &ctx, timeout).await;
                        }
                        RetryDecision::GiveUp => break,
                    }
                }

                match outcome.status() {
                    JobStatus::Success | JobStatus::Partial => {
                        self.breaker.record_success(&spec.name);
                    }
                    JobStatus::Failed => {
                        self.breaker.record_failure(&spec.name);
                    }
                    // Intentional non-execution carries no breaker signal.
                    JobStatus::Skipped => {}
                }

                JobResult::from_outcome(&spec.name, &outcome, started, attempts)
            }
        }
    }

    /// One invocation inside the failure boundary: timeout-bounded,
    /// panic-contained.
    async fn attempt(
        &self,
        spec: &StageSpec,
        ctx: &StageContext,
        timeout: Duration,
    ) -> StageOutcome {
        let guarded = AssertUnwindSafe(spec.runner.run(ctx)).catch_unwind();
        match tokio::time::timeout(timeout, guarded).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(stage = %spec.name, panic = %message, "stage panicked");
                StageOutcome::error(format!("stage panicked: {message}"))
            }
            Err(_) => {
                tracing::warn!(
                    stage = %spec.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "stage timed out"
                );
                StageOutcome::error(format!("timed out after {}ms", timeout.as_millis()))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
