//! Scripted in-process [`ControlPlane`] for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::Instant;

use crate::client::transport::{ControlPlane, PollResponse};
use crate::common::messages::{EncryptedOutputs, Job, JobRequest, JobStatus, Mode};
use crate::error::{Error, Result};
use crate::keys;

/// What one long-poll query answers.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    RequestTimeout,
    Pending,
    Succeeded,
    Failed(String),
    ApiError(u16),
}

/// What the outputs endpoint answers.
#[derive(Debug, Clone)]
pub(crate) enum OutputsScript {
    Plaintext(Vec<u8>),
    Raw(String),
    ApiError(u16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CallKind {
    Create,
    Wait,
    Outputs,
    Get,
}

pub(crate) struct ScriptedControlPlane {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    hold: Duration,
    created_status: JobStatus,
    outputs: OutputsScript,
    recipient: Mutex<Option<String>>,
    jobs_by_token: Mutex<HashMap<uuid::Uuid, String>>,
    calls: Mutex<Vec<(CallKind, Instant)>>,
}

impl ScriptedControlPlane {
    pub(crate) fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback: Step::RequestTimeout,
            hold: Duration::ZERO,
            created_status: JobStatus::Pending,
            outputs: OutputsScript::Plaintext(b"{}".to_vec()),
            recipient: Mutex::new(None),
            jobs_by_token: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Each long-poll query blocks this long before answering.
    pub(crate) fn with_hold(mut self, hold: Duration) -> Self {
        self.hold = hold;
        self
    }

    pub(crate) fn with_outputs(mut self, outputs: OutputsScript) -> Self {
        self.outputs = outputs;
        self
    }

    pub(crate) fn with_created_status(mut self, status: JobStatus) -> Self {
        self.created_status = status;
        self
    }

    /// Recipient the outputs are encrypted to when no job was created first.
    pub(crate) fn with_recipient(self, recipient: &str) -> Self {
        *self.recipient.lock().unwrap() = Some(recipient.to_string());
        self
    }

    pub(crate) fn calls(&self, kind: CallKind) -> Vec<Instant> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, at)| *at)
            .collect()
    }

    fn record(&self, kind: CallKind) {
        self.calls.lock().unwrap().push((kind, Instant::now()));
    }

    fn job(&self, id: &str, status: JobStatus, message: Option<String>) -> Job {
        Job {
            id: id.to_string(),
            project_id: "shop".to_string(),
            env_id: "staging".to_string(),
            mode: Mode::Deploy,
            status,
            status_message: message,
            created_at: Utc::now(),
            completed_at: status.is_terminal().then(Utc::now),
            encrypted_outputs: (status == JobStatus::Succeeded)
                .then(|| format!("/jobs/{id}/encrypted-outputs")),
        }
    }
}

#[async_trait]
impl ControlPlane for ScriptedControlPlane {
    async fn create_job(&self, request: &JobRequest) -> Result<Job> {
        self.record(CallKind::Create);
        *self.recipient.lock().unwrap() = Some(request.recipient().to_string());

        let id = self
            .jobs_by_token
            .lock()
            .unwrap()
            .entry(request.idempotency_token())
            .or_insert_with(|| format!("job-{}", uuid::Uuid::new_v4()))
            .clone();

        Ok(self.job(&id, self.created_status, None))
    }

    async fn wait_for_completion(&self, job_id: &str) -> Result<PollResponse> {
        self.record(CallKind::Wait);
        if !self.hold.is_zero() {
            tokio::time::sleep(self.hold).await;
        }

        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::RequestTimeout => Ok(PollResponse::RequestTimeout),
            Step::Pending => Ok(PollResponse::Job(self.job(job_id, JobStatus::Pending, None))),
            Step::Succeeded => Ok(PollResponse::Job(self.job(job_id, JobStatus::Succeeded, None))),
            Step::Failed(message) => Ok(PollResponse::Job(self.job(
                job_id,
                JobStatus::Failed,
                Some(message),
            ))),
            Step::ApiError(status) => Err(Error::Api {
                status,
                body: "scripted failure".to_string(),
            }),
        }
    }

    async fn encrypted_outputs(&self, _job_id: &str) -> Result<EncryptedOutputs> {
        self.record(CallKind::Outputs);

        match &self.outputs {
            OutputsScript::Plaintext(plaintext) => {
                let recipient = self
                    .recipient
                    .lock()
                    .unwrap()
                    .clone()
                    .expect("scripted control plane has no recipient");
                let ciphertext = keys::encrypt(&recipient, plaintext).unwrap();
                Ok(EncryptedOutputs::from_ciphertext(&ciphertext))
            }
            OutputsScript::Raw(raw) => Ok(EncryptedOutputs {
                encrypted_outputs: raw.clone(),
            }),
            OutputsScript::ApiError(status) => Err(Error::Api {
                status: *status,
                body: "scripted failure".to_string(),
            }),
        }
    }

    async fn get_job(&self, job_id: &str) -> Result<Job> {
        self.record(CallKind::Get);
        Ok(self.job(job_id, JobStatus::Pending, None))
    }
}
