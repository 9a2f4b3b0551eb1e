//! Retry coordinator: per-task retry state machine.
//!
//! `decide` is pure: given the attempt count and the failure signal it
//! returns the next action. The async methods carry that action out:
//! persist the task row first, then settle the lease, so attempt N+1 can only
//! be delivered after attempt N's state is in the store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use super::backoff::BackoffPolicy;
use super::classifier::classify;
use crate::config::RetryConfig;
use crate::counters::JobCounterAggregator;
use crate::domain::{
    Bucket, CounterDelta, ErrorKind, SieveError, Signal, UrlTask, UrlTaskStatus,
};
use crate::ports::{Clock, DeliveryQueue, Lease, Store};

/// Why a task stopped being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    Permanent,
    MaxAttemptsExceeded,
}

impl GiveUpReason {
    pub fn as_str(self) -> &'static str {
        match self {
            GiveUpReason::Permanent => "permanent_error",
            GiveUpReason::MaxAttemptsExceeded => "max_attempts_exceeded",
        }
    }
}

/// The next action for a failed attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    GiveUp { reason: GiveUpReason },
}

pub struct RetryCoordinator {
    backoff: BackoffPolicy,
    max_attempts: u32,
    store: Arc<dyn Store>,
    queue: Arc<dyn DeliveryQueue>,
    counters: Arc<JobCounterAggregator>,
    clock: Arc<dyn Clock>,
}

impl RetryCoordinator {
    pub fn new(
        config: &RetryConfig,
        store: Arc<dyn Store>,
        queue: Arc<dyn DeliveryQueue>,
        counters: Arc<JobCounterAggregator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            backoff: BackoffPolicy::from_config(config),
            max_attempts: config.max_attempts,
            store,
            queue,
            counters,
            clock,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pure decision for a failure on attempt number `attempt_count`
    /// (1-based, already incremented for the failed attempt).
    pub fn decide(&self, attempt_count: u32, signal: &Signal) -> RetryDecision {
        decide(&self.backoff, self.max_attempts, attempt_count, signal)
    }

    /// True if the task must not be attempted again.
    pub fn exhausted(&self, task: &UrlTask) -> bool {
        task.attempt_count >= self.max_attempts
    }

    /// Start an attempt and persist it before any pipeline work runs.
    pub async fn begin_attempt(&self, task: &mut UrlTask) -> Result<(), SieveError> {
        task.begin_attempt(self.clock.now());
        self.store.upsert_url_task(task).await?;
        Ok(())
    }

    /// Record a failed attempt and either schedule the retry or fail the task.
    pub async fn on_failure(
        &self,
        lease: &Lease,
        task: &mut UrlTask,
        signal: &Signal,
    ) -> Result<RetryDecision, SieveError> {
        task.record_failure(&signal.message, self.clock.now());
        let decision = self.decide(task.attempt_count, signal);

        match &decision {
            RetryDecision::Retry { delay } => {
                // status stays Processing while the retry is pending
                self.store.upsert_url_task(task).await?;
                info!(
                    task_id = %task.id,
                    attempt = task.attempt_count,
                    max_attempts = self.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    code = ?signal.code,
                    "scheduling retry"
                );
                self.queue.nack(lease, *delay).await?;
            }
            RetryDecision::GiveUp { reason } => {
                self.give_up(lease, task, *reason).await?;
            }
        }
        Ok(decision)
    }

    /// Fail the task permanently: write status, count it, drop the lease.
    pub async fn give_up(
        &self,
        lease: &Lease,
        task: &mut UrlTask,
        reason: GiveUpReason,
    ) -> Result<(), SieveError> {
        task.settle(UrlTaskStatus::Failed, reason.as_str(), self.clock.now());
        self.store.upsert_url_task(task).await?;
        warn!(
            task_id = %task.id,
            job_id = %task.job_id,
            attempts = task.attempt_count,
            reason = reason.as_str(),
            last_error = task.last_error.as_deref().unwrap_or(""),
            "task failed permanently"
        );

        let delta = CounterDelta::terminal(task.id, Bucket::Failed).with_cost(task.cost);
        self.counters.record(task.job_id, delta).await?;
        self.queue.ack(lease).await?;
        Ok(())
    }
}

fn decide(
    backoff: &BackoffPolicy,
    max_attempts: u32,
    attempt_count: u32,
    signal: &Signal,
) -> RetryDecision {
    if classify(signal) == ErrorKind::Permanent {
        return RetryDecision::GiveUp {
            reason: GiveUpReason::Permanent,
        };
    }
    if attempt_count >= max_attempts {
        return RetryDecision::GiveUp {
            reason: GiveUpReason::MaxAttemptsExceeded,
        };
    }
    RetryDecision::Retry {
        delay: backoff.delay_for(attempt_count.saturating_sub(1), signal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rstest::rstest;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::default()
    }

    #[rstest]
    #[case(1, RetryDecision::Retry { delay: Duration::from_millis(1000) })]
    #[case(2, RetryDecision::Retry { delay: Duration::from_millis(2000) })]
    #[case(3, RetryDecision::GiveUp { reason: GiveUpReason::MaxAttemptsExceeded })]
    fn transient_failures_back_off_until_the_ceiling(
        #[case] attempt: u32,
        #[case] expected: RetryDecision,
    ) {
        let timeout = Signal::from_message("ETIMEDOUT");
        assert_eq!(decide(&policy(), 3, attempt, &timeout), expected);
    }

    #[test]
    fn permanent_failure_stops_on_first_attempt() {
        let unauthorized = Signal::from_message("HTTP 401: Unauthorized");
        assert_eq!(
            decide(&policy(), 3, 1, &unauthorized),
            RetryDecision::GiveUp {
                reason: GiveUpReason::Permanent
            }
        );
    }

    #[test]
    fn rate_limit_waits_thirty_seconds() {
        let limited = Signal::http(429, "Too Many Requests");
        assert_eq!(
            decide(&policy(), 3, 2, &limited),
            RetryDecision::Retry {
                delay: Duration::from_secs(30)
            }
        );
    }

    #[test]
    fn ceiling_wins_over_transient_classification() {
        let limited = Signal::http(429, "Too Many Requests");
        assert_eq!(
            decide(&policy(), 3, 3, &limited),
            RetryDecision::GiveUp {
                reason: GiveUpReason::MaxAttemptsExceeded
            }
        );
    }

    /// 20% per-attempt transient failure, 3 attempts: expected permanent
    /// failure rate is 0.2^3 = 0.8%.
    #[test]
    fn monte_carlo_permanent_failure_rate_stays_under_one_percent() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let timeout = Signal::from_message("ETIMEDOUT");
        let trials = 10_000;
        let mut failures = 0;
        let mut max_seen = 0;

        for _ in 0..trials {
            let mut attempt = 0;
            loop {
                attempt += 1;
                max_seen = max_seen.max(attempt);
                if !rng.gen_bool(0.2) {
                    break;
                }
                match decide(&policy(), 3, attempt, &timeout) {
                    RetryDecision::Retry { .. } => continue,
                    RetryDecision::GiveUp { .. } => {
                        failures += 1;
                        break;
                    }
                }
            }
        }

        assert!(max_seen <= 3);
        assert!(failures < 100, "failures = {failures}");
    }
}
