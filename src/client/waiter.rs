//! # Completion Waiter
//!
//! Waits for a submitted job to reach a terminal state, then fetches and
//! decrypts its outputs with the job's private key.
//!
//! ## State Machine
//!
//! ```text
//!            408 / pending (deadline not reached)
//!              +------+
//!              v      |
//!           Polling --+---- succeeded ----> Decrypting ---- ok ----> Done(Decrypted)
//!              |                               |
//!              |-- failed --------> Done(Failed)
//!              |-- deadline ------> Done(Aborted(DeadlineExceeded))
//!              |-- other error ---> Done(Aborted(error))
//!                                              |-- fetch/decode/decrypt error --> Done(Aborted(OutputRetrieval))
//! ```
//!
//! The deadline is fixed once when the wait starts. A request-level timeout
//! (HTTP 408 from the long-poll endpoint) is the server asking us to come back,
//! not an error; only the deadline ends the loop. Queries never overlap, and a
//! query still in flight when the deadline passes is cancelled.
//!
//! The [`PrivateKey`] is taken by value and dropped when the wait returns, on
//! every path.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::{sleep_until, timeout_at, Instant};

use crate::client::metrics::WaitStats;
use crate::client::transport::{ControlPlane, PollResponse};
use crate::common::config::{WaitConfig, DEFAULT_WAIT_TIMEOUT};
use crate::common::messages::{Job, JobStatus, Outputs};
use crate::error::{Error, Result, RetrievalError};
use crate::keys::PrivateKey;

/// Minimum gap between the starts of two poll requests unless configured.
pub const DEFAULT_MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Stand-in deadline for timeouts too large to add to the current instant.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// How a wait ended.
#[derive(Debug)]
pub enum Outcome {
    /// The job succeeded and its outputs were decrypted.
    Decrypted(Outputs),
    /// The job reached `failed`. Its outputs were never requested.
    Failed { job_id: String, message: String },
    /// The wait gave up: deadline, transport/API error or output retrieval.
    Aborted(Error),
}

impl Outcome {
    pub fn into_result(self) -> Result<Outputs> {
        match self {
            Outcome::Decrypted(outputs) => Ok(outputs),
            Outcome::Failed { job_id, message } => Err(Error::JobFailed { job_id, message }),
            Outcome::Aborted(err) => Err(err),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Outcome::Decrypted(_) => "decrypted",
            Outcome::Failed { .. } => "failed",
            Outcome::Aborted(Error::DeadlineExceeded { .. }) => "deadline_exceeded",
            Outcome::Aborted(Error::OutputRetrieval { .. }) => "output_retrieval_failed",
            Outcome::Aborted(_) => "aborted",
        }
    }
}

#[derive(Debug)]
pub(crate) enum State {
    Polling,
    Decrypting(Job),
    Done(Outcome),
}

impl State {
    /// Where a job record sends the machine.
    pub(crate) fn from_job(job: Job) -> State {
        match job.status {
            JobStatus::Pending => State::Polling,
            JobStatus::Succeeded => State::Decrypting(job),
            JobStatus::Failed => State::Done(Outcome::Failed {
                message: job
                    .status_message
                    .unwrap_or_else(|| "job failed without a status message".to_string()),
                job_id: job.id,
            }),
        }
    }

    /// Where one poll result sends the machine. The deadline is handled by the
    /// caller, before and around the query.
    pub(crate) fn after_poll(result: Result<PollResponse>) -> State {
        match result {
            Ok(PollResponse::RequestTimeout) => State::Polling,
            Ok(PollResponse::Job(job)) => State::from_job(job),
            Err(err) => State::Done(Outcome::Aborted(err)),
        }
    }
}

/// Polls one job to completion and decrypts its outputs.
pub struct CompletionWaiter<P: ?Sized> {
    plane: Arc<P>,
    default_timeout: Duration,
    min_poll_interval: Duration,
}

impl<P: ControlPlane + ?Sized> CompletionWaiter<P> {
    pub fn new(plane: Arc<P>) -> Self {
        Self {
            plane,
            default_timeout: DEFAULT_WAIT_TIMEOUT,
            min_poll_interval: DEFAULT_MIN_POLL_INTERVAL,
        }
    }

    pub fn from_config(plane: Arc<P>, config: &WaitConfig) -> Self {
        Self::new(plane)
            .with_default_timeout(config.default_timeout())
            .with_min_poll_interval(config.min_poll_interval())
    }

    /// Deadline used when `wait` is called without one.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Zero means a fast 408 is followed by the next query immediately.
    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = interval;
        self
    }

    /// Waits for `job_id` to finish and returns its decrypted outputs.
    ///
    /// # Arguments
    /// - `job_id`: id returned by the submitter
    /// - `timeout`: overall deadline, measured from now; `None` uses the default
    /// - `private_key`: private half of the key pair submitted with the job
    ///
    /// # Errors
    /// - [`Error::DeadlineExceeded`] if no terminal state was seen in time
    /// - [`Error::JobFailed`] if the job failed
    /// - [`Error::OutputRetrieval`] if the job succeeded but its outputs
    ///   could not be fetched or decrypted
    /// - [`Error::Client`] / [`Error::Api`] for any other failed query
    pub async fn wait(
        &self,
        job_id: &str,
        timeout: Option<Duration>,
        private_key: PrivateKey,
    ) -> Result<Outputs> {
        self.wait_with_stats(job_id, timeout, private_key).await.0
    }

    /// Same as [`wait`](Self::wait), also returning the wait's counters.
    pub async fn wait_with_stats(
        &self,
        job_id: &str,
        timeout: Option<Duration>,
        private_key: PrivateKey,
    ) -> (Result<Outputs>, WaitStats) {
        let (outcome, stats) = self
            .run(job_id, State::Polling, timeout, private_key)
            .await;
        (outcome.into_result(), stats)
    }

    /// Continues from a job record the caller already holds, e.g. the one
    /// returned by the submitter. A terminal record is acted on without polling.
    pub async fn wait_from(
        &self,
        job: Job,
        timeout: Option<Duration>,
        private_key: PrivateKey,
    ) -> (Result<Outputs>, WaitStats) {
        let job_id = job.id.clone();
        let (outcome, stats) = self
            .run(&job_id, State::from_job(job), timeout, private_key)
            .await;
        (outcome.into_result(), stats)
    }

    async fn run(
        &self,
        job_id: &str,
        initial: State,
        timeout: Option<Duration>,
        private_key: PrivateKey,
    ) -> (Outcome, WaitStats) {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();
        let deadline = started
            .checked_add(timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let mut stats = WaitStats::new(job_id);
        let mut last_poll: Option<Instant> = None;

        info!("⏳ Waiting up to {:?} for job {}", timeout, job_id);

        let mut state = initial;
        let outcome = loop {
            state = match state {
                State::Polling => {
                    if let Some(previous) = last_poll {
                        let earliest = previous + self.min_poll_interval;
                        if earliest > Instant::now() {
                            sleep_until(earliest.min(deadline)).await;
                        }
                    }

                    if Instant::now() >= deadline {
                        State::Done(Outcome::Aborted(deadline_exceeded(job_id, timeout)))
                    } else {
                        last_poll = Some(Instant::now());
                        match timeout_at(deadline, self.plane.wait_for_completion(job_id)).await {
                            Ok(result) => {
                                let request_timeout =
                                    matches!(result, Ok(PollResponse::RequestTimeout));
                                stats.record_poll(request_timeout);
                                debug!(
                                    "Poll #{} for job {}: {}",
                                    stats.polls,
                                    job_id,
                                    describe(&result)
                                );
                                State::after_poll(result)
                            }
                            Err(_) => {
                                stats.record_poll(false);
                                State::Done(Outcome::Aborted(deadline_exceeded(job_id, timeout)))
                            }
                        }
                    }
                }
                State::Decrypting(job) => State::Done(self.retrieve(&job.id, &private_key).await),
                State::Done(outcome) => break outcome,
            };
        };
        drop(private_key);

        stats.finish(started.elapsed(), outcome.label());
        match &outcome {
            Outcome::Decrypted(outputs) => info!(
                "✅ Job {} succeeded, decrypted {} bytes of outputs after {} polls",
                job_id,
                outputs.as_bytes().len(),
                stats.polls
            ),
            Outcome::Failed { message, .. } => warn!("❌ Job {} failed: {}", job_id, message),
            Outcome::Aborted(err) => warn!("⚠️  Stopped waiting for job {}: {}", job_id, err),
        }

        (outcome, stats)
    }

    async fn retrieve(&self, job_id: &str, private_key: &PrivateKey) -> Outcome {
        match self.fetch_and_decrypt(job_id, private_key).await {
            Ok(outputs) => Outcome::Decrypted(outputs),
            Err(source) => Outcome::Aborted(Error::OutputRetrieval {
                job_id: job_id.to_string(),
                source,
            }),
        }
    }

    async fn fetch_and_decrypt(
        &self,
        job_id: &str,
        private_key: &PrivateKey,
    ) -> std::result::Result<Outputs, RetrievalError> {
        let encrypted = self
            .plane
            .encrypted_outputs(job_id)
            .await
            .map_err(|e| RetrievalError::Fetch(Box::new(e)))?;
        let ciphertext = encrypted.ciphertext()?;
        let plaintext = private_key.decrypt(&ciphertext)?;
        Ok(Outputs::new(plaintext))
    }
}

fn deadline_exceeded(job_id: &str, waited: Duration) -> Error {
    Error::DeadlineExceeded {
        job_id: job_id.to_string(),
        waited,
    }
}

fn describe(result: &Result<PollResponse>) -> String {
    match result {
        Ok(PollResponse::RequestTimeout) => "request timeout, polling again".to_string(),
        Ok(PollResponse::Job(job)) => format!("status {}", job.status),
        Err(err) => format!("error: {err}"),
    }
}
