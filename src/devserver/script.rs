//! Configuration and per-job bookkeeping for the development control plane.

use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::common::messages::{EncryptedOutputs, Job, JobStatus};
use crate::keys::{self, EncryptError};

/// Top-level file read by the `dev_control_plane` binary.
///
/// ```toml
/// listen = "127.0.0.1:8080"
/// long_poll_window_ms = 2000
///
/// [script]
/// pending_polls = 2
///
/// [script.result]
/// status = "succeeded"
/// outputs = { url = "https://example.test" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
    /// How long a wait request is held before answering 408
    #[serde(default = "default_long_poll_window_ms")]
    pub long_poll_window_ms: u64,
    /// Bearer token callers must present, if any
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default)]
    pub script: JobScript,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_long_poll_window_ms() -> u64 {
    2000
}

impl DevServerConfig {
    pub fn new(script: JobScript) -> Self {
        Self {
            listen: default_listen(),
            long_poll_window_ms: default_long_poll_window_ms(),
            api_token: None,
            script,
        }
    }

    pub fn with_long_poll_window(mut self, window: Duration) -> Self {
        self.long_poll_window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn long_poll_window(&self) -> Duration {
        Duration::from_millis(self.long_poll_window_ms)
    }
}

/// How every job created on the server progresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobScript {
    /// Wait requests answered with 408 before the job turns terminal
    #[serde(default)]
    pub pending_polls: u32,
    pub result: ScriptedResult,
    /// Status to answer on the encrypted-outputs endpoint instead of 200
    #[serde(default)]
    pub outputs_status: Option<u16>,
}

impl Default for JobScript {
    fn default() -> Self {
        Self {
            pending_polls: 0,
            result: ScriptedResult::Succeeded {
                outputs: Value::Object(Default::default()),
            },
            outputs_status: None,
        }
    }
}

impl JobScript {
    pub fn succeeds_after(pending_polls: u32, outputs: Value) -> Self {
        Self {
            pending_polls,
            result: ScriptedResult::Succeeded { outputs },
            outputs_status: None,
        }
    }

    pub fn fails_after(pending_polls: u32, message: impl Into<String>) -> Self {
        Self {
            pending_polls,
            result: ScriptedResult::Failed {
                message: message.into(),
            },
            outputs_status: None,
        }
    }

    pub fn never_finishes() -> Self {
        Self {
            pending_polls: 0,
            result: ScriptedResult::Pending,
            outputs_status: None,
        }
    }

    pub fn with_outputs_status(mut self, status: u16) -> Self {
        self.outputs_status = Some(status);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScriptedResult {
    Succeeded { outputs: Value },
    Failed { message: String },
    /// Stays pending forever
    Pending,
}

/// A job held by the server together with what the client never sees.
#[derive(Debug)]
pub(crate) struct DevJob {
    pub org_id: String,
    pub job: Job,
    pub recipient: String,
    pub polls: u32,
    pub ciphertext: Option<Vec<u8>>,
}

impl DevJob {
    pub fn new(org_id: &str, job: Job, recipient: String) -> Self {
        Self {
            org_id: org_id.to_string(),
            job,
            recipient,
            polls: 0,
            ciphertext: None,
        }
    }

    /// Records one wait request and applies the script once the pending polls
    /// are used up.
    pub fn advance(&mut self, script: &JobScript) -> Result<(), EncryptError> {
        if self.job.status.is_terminal() {
            return Ok(());
        }

        self.polls += 1;
        if self.polls <= script.pending_polls {
            return Ok(());
        }

        match &script.result {
            ScriptedResult::Pending => {}
            ScriptedResult::Failed { message } => {
                self.job.status = JobStatus::Failed;
                self.job.status_message = Some(message.clone());
                self.job.completed_at = Some(Utc::now());
            }
            ScriptedResult::Succeeded { outputs } => {
                let plaintext = serde_json::to_vec(outputs)
                    .map_err(|e| EncryptError::Io(std::io::Error::other(e)))?;
                self.ciphertext = Some(keys::encrypt(&self.recipient, &plaintext)?);
                self.job.status = JobStatus::Succeeded;
                self.job.completed_at = Some(Utc::now());
                self.job.encrypted_outputs = Some(format!(
                    "/orgs/{}/jobs/{}/encrypted-outputs",
                    self.org_id, self.job.id
                ));
            }
        }
        Ok(())
    }

    pub fn encrypted_outputs(&self) -> Option<EncryptedOutputs> {
        self.ciphertext
            .as_deref()
            .map(EncryptedOutputs::from_ciphertext)
    }
}
