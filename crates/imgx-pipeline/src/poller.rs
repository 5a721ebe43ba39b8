//! Job poller.
//!
//! Each job is polled by a [`PollSession`]: a small state machine that owns
//! the job's single outstanding query and its [`RetryBudget`]. The session
//! decides what a reply means; [`JobPoller`] supplies the timing and I/O.
//!
//! Timing per job:
//! - wait `poll_interval`, then issue a query (the first one included)
//! - a pending reply or a transport error spends one attempt
//! - a completed or failed reply resolves immediately
//! - a query still outstanding when the next interval elapses is
//!   superseded: it is cancelled and reissued without spending an attempt
//!
//! Supersessions have their own budget, so the wall clock for one job is
//! bounded by `poll_interval * (max_attempts + max_superseded)`.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use imgx_models::{JobHandle, JobId, JobState, ResultRef};
use imgx_processor::{ProcessingBackend, ProcessorResult};

use crate::config::PipelineConfig;
use crate::logging::JobLogger;
use crate::metrics;
use crate::registry::JobRegistry;

/// Message for a completion that carried no result location.
pub const MISSING_RESULT_MESSAGE: &str = "Processing finished without a result location";

/// Attempts and supersessions left for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    max_attempts: u32,
    attempts_used: u32,
    max_superseded: u32,
    superseded: u32,
}

impl RetryBudget {
    pub fn new(max_attempts: u32, max_superseded: u32) -> Self {
        Self {
            max_attempts,
            attempts_used: 0,
            max_superseded,
            superseded: 0,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.max_poll_attempts, config.max_superseded)
    }

    /// Spend one attempt. Returns whether another attempt is allowed.
    pub fn consume_attempt(&mut self) -> bool {
        self.attempts_used += 1;
        self.attempts_used < self.max_attempts
    }

    /// Record one superseded query. Returns whether another is allowed.
    pub fn consume_supersession(&mut self) -> bool {
        self.superseded += 1;
        self.superseded < self.max_superseded
    }

    pub fn attempts_used(&self) -> u32 {
        self.attempts_used
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts_used)
    }

    pub fn superseded(&self) -> u32 {
        self.superseded
    }
}

/// The query a session currently has outstanding.
#[derive(Debug, Clone)]
pub struct QueryHandle {
    pub seq: u64,
    pub token: CancellationToken,
}

/// Terminal outcome of polling one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(ResultRef),
    Failed(String),
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Completed(_))
    }
}

/// What the poller should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Wait one interval, then query again
    Retry,
    /// The interval already elapsed; query again now
    Reissue,
    /// Reply to a query that is no longer current; ignored
    Stale,
    Resolved(PollOutcome),
}

/// How a job was resolved.
#[derive(Debug, Clone)]
pub struct PollResolution {
    pub job_id: JobId,
    pub outcome: PollOutcome,
    pub queries_issued: u64,
    pub budget: RetryBudget,
}

/// Polling state for one job.
#[derive(Debug)]
pub struct PollSession {
    job_id: JobId,
    result_hint: Option<ResultRef>,
    budget: RetryBudget,
    current: Option<QueryHandle>,
    issued: u64,
}

impl PollSession {
    pub fn new(handle: &JobHandle, budget: RetryBudget) -> Self {
        Self {
            job_id: handle.job_id.clone(),
            result_hint: handle.result_hint.clone(),
            budget,
            current: None,
            issued: 0,
        }
    }

    /// Start a new query. The previous query's token is cancelled first,
    /// whether or not it already answered.
    pub fn issue_query(&mut self) -> QueryHandle {
        if let Some(previous) = self.current.take() {
            previous.token.cancel();
        }
        self.issued += 1;
        let query = QueryHandle {
            seq: self.issued,
            token: CancellationToken::new(),
        };
        self.current = Some(query.clone());
        query
    }

    /// Classify the reply to query `seq`.
    pub fn on_reply(&mut self, seq: u64, reply: ProcessorResult<JobState>) -> Step {
        if self.current.as_ref().map(|q| q.seq) != Some(seq) {
            debug!(job_id = %self.job_id, seq, "Ignoring reply to a superseded query");
            return Step::Stale;
        }

        match reply {
            Ok(JobState::Pending) => {
                metrics::record_poll_query("pending");
                self.spend_attempt()
            }
            Ok(JobState::Completed(result)) => {
                metrics::record_poll_query("completed");
                match result.or_else(|| self.result_hint.clone()) {
                    Some(result) => Step::Resolved(PollOutcome::Completed(result)),
                    None => Step::Resolved(PollOutcome::Failed(MISSING_RESULT_MESSAGE.to_string())),
                }
            }
            Ok(JobState::Failed(message)) => {
                metrics::record_poll_query("failed");
                Step::Resolved(PollOutcome::Failed(message))
            }
            Err(e) if e.is_cancelled() => self.on_superseded(),
            Err(e) => {
                metrics::record_poll_query("error");
                warn!(job_id = %self.job_id, error = %e, "Status query failed");
                self.spend_attempt()
            }
        }
    }

    /// The next tick arrived before the current query answered.
    pub fn on_superseded(&mut self) -> Step {
        metrics::record_poll_query("superseded");
        if let Some(current) = &self.current {
            current.token.cancel();
        }

        if self.budget.consume_supersession() {
            Step::Reissue
        } else {
            Step::Resolved(PollOutcome::Failed(format!(
                "Processing status unavailable: {} status checks went unanswered",
                self.budget.superseded()
            )))
        }
    }

    fn spend_attempt(&mut self) -> Step {
        if self.budget.consume_attempt() {
            Step::Retry
        } else {
            Step::Resolved(PollOutcome::Failed(format!(
                "Processing timed out after {} status checks",
                self.budget.attempts_used()
            )))
        }
    }

    pub fn queries_issued(&self) -> u64 {
        self.issued
    }

    pub fn budget(&self) -> RetryBudget {
        self.budget
    }

    /// Close the session, cancelling anything still outstanding.
    pub fn finish(mut self, outcome: PollOutcome) -> PollResolution {
        if let Some(current) = self.current.take() {
            current.token.cancel();
        }
        PollResolution {
            job_id: self.job_id,
            outcome,
            queries_issued: self.issued,
            budget: self.budget,
        }
    }
}

/// Drives poll sessions against a processing backend.
#[derive(Clone)]
pub struct JobPoller {
    backend: Arc<dyn ProcessingBackend>,
    registry: JobRegistry,
    interval: Duration,
    max_attempts: u32,
    max_superseded: u32,
}

impl JobPoller {
    pub fn new(backend: Arc<dyn ProcessingBackend>, registry: JobRegistry, config: &PipelineConfig) -> Self {
        Self {
            backend,
            registry,
            interval: config.poll_interval,
            max_attempts: config.max_poll_attempts,
            max_superseded: config.max_superseded,
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Poll one job until it completes, fails, or runs out of budget.
    pub async fn poll_until_resolved(&self, handle: JobHandle) -> PollResolution {
        let logger = JobLogger::new(&handle.job_id, "poll");
        logger.log_start(&handle.original_file_name);

        self.registry.register(handle.clone()).await;
        let mut session = PollSession::new(&handle, RetryBudget::new(self.max_attempts, self.max_superseded));

        let mut wait = true;
        let outcome = loop {
            if wait {
                sleep(self.interval).await;
            }

            let query = session.issue_query();
            self.registry.track_query(&handle.job_id, query.token.clone()).await;

            let step = tokio::select! {
                biased;
                reply = self.backend.query_status(&handle.job_id, &query.token) => session.on_reply(query.seq, reply),
                _ = sleep(self.interval) => session.on_superseded(),
            };

            match step {
                Step::Retry | Step::Stale => wait = true,
                Step::Reissue => {
                    logger.log_warning(&format!("query {} superseded", query.seq));
                    wait = false;
                }
                Step::Resolved(outcome) => break outcome,
            }
        };

        self.registry.remove(&handle.job_id).await;

        match &outcome {
            PollOutcome::Completed(result) => logger.log_completion(result.as_str()),
            PollOutcome::Failed(message) => logger.log_error(message),
        }

        session.finish(outcome)
    }
}
