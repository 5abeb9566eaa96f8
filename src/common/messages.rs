//! # Wire Types
//!
//! Defines the records exchanged with the control plane:
//! - Job submission ([`JobRequest`] and its JSON body [`CreateJobBody`])
//! - Job records returned by create, wait and status calls ([`Job`])
//! - Encrypted outputs and their decrypted form ([`EncryptedOutputs`], [`Outputs`])
//!
//! Everything is JSON over HTTP; timestamps are RFC3339.

use std::fmt;
use std::str::FromStr;

use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::manifest::Manifest;

// ============================================================================
// SUBMISSION
// ============================================================================

/// Where a job runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub project_id: String,
    pub env_id: String,
}

impl Target {
    pub fn new(project_id: impl Into<String>, env_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            env_id: env_id.into(),
        }
    }
}

/// Execution mode of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Apply the manifest.
    Deploy,
    /// Compute what would change without applying it.
    PlanOnly,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Deploy => f.write_str("deploy"),
            Mode::PlanOnly => f.write_str("plan_only"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "deploy" => Ok(Mode::Deploy),
            "plan_only" | "plan-only" => Ok(Mode::PlanOnly),
            other => Err(format!(
                "unknown mode '{other}', expected 'deploy' or 'plan_only'"
            )),
        }
    }
}

/// An immutable job submission.
///
/// The idempotency token is generated once per request. Re-submitting the same
/// `JobRequest` (for example after a transport failure) reuses the token, so the
/// control plane collapses the attempts into a single job.
#[derive(Debug, Clone)]
pub struct JobRequest {
    target: Target,
    manifest: Manifest,
    mode: Mode,
    idempotency_token: Uuid,
    recipient: String,
}

impl JobRequest {
    /// Builds a request from raw manifest text.
    ///
    /// # Arguments
    /// - `target`: project and environment the job runs in
    /// - `manifest_text`: YAML or JSON manifest
    /// - `mode`: deploy or plan only
    /// - `recipient`: the `age1…` public key the outputs are encrypted to
    ///
    /// # Errors
    /// Returns [`crate::Error::Manifest`] when the manifest does not parse.
    /// Nothing is sent anywhere.
    pub fn new(
        target: Target,
        manifest_text: &str,
        mode: Mode,
        recipient: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self::from_manifest(
            target,
            Manifest::parse(manifest_text)?,
            mode,
            recipient,
        ))
    }

    pub fn from_manifest(
        target: Target,
        manifest: Manifest,
        mode: Mode,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            target,
            manifest,
            mode,
            idempotency_token: Uuid::new_v4(),
            recipient: recipient.into(),
        }
    }

    /// Overrides the generated idempotency token.
    pub fn with_idempotency_token(mut self, token: Uuid) -> Self {
        self.idempotency_token = token;
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn idempotency_token(&self) -> Uuid {
        self.idempotency_token
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub fn body(&self) -> CreateJobBody {
        CreateJobBody {
            project_id: self.target.project_id.clone(),
            env_id: self.target.env_id.clone(),
            manifest: self.manifest.clone(),
            mode: self.mode,
            encrypted_outputs_recipient: self.recipient.clone(),
        }
    }
}

/// JSON body of `POST /jobs`. The idempotency token travels as a header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobBody {
    pub project_id: String,
    pub env_id: String,
    pub manifest: Manifest,
    pub mode: Mode,
    pub encrypted_outputs_recipient: String,
}

// ============================================================================
// JOB RECORDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, JobStatus::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => f.write_str("pending"),
            JobStatus::Succeeded => f.write_str("succeeded"),
            JobStatus::Failed => f.write_str("failed"),
        }
    }
}

/// A job as reported by the control plane. Only the control plane mutates it;
/// the client re-reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub project_id: String,
    pub env_id: String,
    pub mode: Mode,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Path of the encrypted-outputs resource, set once the job succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_outputs: Option<String>,
}

// ============================================================================
// OUTPUTS
// ============================================================================

/// Body of `GET /jobs/{id}/encrypted-outputs`: a base64 `age` ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptedOutputs {
    pub encrypted_outputs: String,
}

impl EncryptedOutputs {
    pub fn from_ciphertext(ciphertext: &[u8]) -> Self {
        Self {
            encrypted_outputs: general_purpose::STANDARD.encode(ciphertext),
        }
    }

    pub fn ciphertext(&self) -> std::result::Result<Vec<u8>, base64::DecodeError> {
        general_purpose::STANDARD.decode(self.encrypted_outputs.trim())
    }
}

/// Decrypted job outputs, exactly as the control plane produced them.
#[derive(Clone, PartialEq, Eq)]
pub struct Outputs(Vec<u8>);

impl Outputs {
    pub fn new(plaintext: Vec<u8>) -> Self {
        Self(plaintext)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::from_slice(&self.0)
    }
}

impl fmt::Debug for Outputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Outputs({} bytes)", self.0.len())
    }
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Formats a timestamp as RFC3339 with second precision, for display.
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn job_parses_from_control_plane_json() {
        let job: Job = serde_json::from_value(json!({
            "id": "job-123",
            "project_id": "shop",
            "env_id": "staging",
            "mode": "plan_only",
            "status": "succeeded",
            "created_at": "2024-05-01T10:00:00Z",
            "completed_at": "2024-05-01T10:03:00Z",
            "encrypted_outputs": "/orgs/acme/jobs/job-123/encrypted-outputs"
        }))
        .unwrap();

        assert_eq!(job.mode, Mode::PlanOnly);
        assert!(job.status.is_terminal());
        assert_eq!(job.status_message, None);
        assert_eq!(
            format_timestamp(&job.completed_at.unwrap()),
            "2024-05-01T10:03:00Z"
        );
    }

    #[test]
    fn pending_is_the_only_non_terminal_status() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn request_body_carries_recipient_and_mode() {
        let request = JobRequest::new(
            Target::new("shop", "staging"),
            "workloads: {}",
            Mode::Deploy,
            "age1recipient",
        )
        .unwrap();

        let body = serde_json::to_value(request.body()).unwrap();
        assert_eq!(
            body,
            json!({
                "project_id": "shop",
                "env_id": "staging",
                "manifest": {"workloads": {}},
                "mode": "deploy",
                "encrypted_outputs_recipient": "age1recipient"
            })
        );
    }

    #[test]
    fn each_request_gets_its_own_token() {
        let a = JobRequest::new(Target::new("p", "e"), "{}", Mode::Deploy, "age1x").unwrap();
        let b = JobRequest::new(Target::new("p", "e"), "{}", Mode::Deploy, "age1x").unwrap();
        assert_ne!(a.idempotency_token(), b.idempotency_token());

        let retried = a.clone();
        assert_eq!(a.idempotency_token(), retried.idempotency_token());
    }

    #[test]
    fn mode_parses_both_spellings() {
        assert_eq!("deploy".parse::<Mode>().unwrap(), Mode::Deploy);
        assert_eq!("plan_only".parse::<Mode>().unwrap(), Mode::PlanOnly);
        assert_eq!("plan-only".parse::<Mode>().unwrap(), Mode::PlanOnly);
        assert!("apply".parse::<Mode>().is_err());
    }

    #[test]
    fn encrypted_outputs_decode_base64() {
        let outputs = EncryptedOutputs::from_ciphertext(b"\x00\x01binary");
        assert_eq!(outputs.ciphertext().unwrap(), b"\x00\x01binary");

        let broken = EncryptedOutputs {
            encrypted_outputs: "%%%".to_string(),
        };
        assert!(broken.ciphertext().is_err());
    }

    #[test]
    fn timestamps_format_as_rfc3339() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-01-02T03:04:05Z");
    }
}
