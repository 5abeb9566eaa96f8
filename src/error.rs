//! # Error Taxonomy
//!
//! Every failure the deploy workflow can surface maps to exactly one variant of
//! [`Error`]. Callers decide what to do next based on the variant:
//!
//! - [`Error::Client`] / [`Error::Api`] / [`Error::DeadlineExceeded`]: the job's
//!   fate is unknown, retrying the whole operation is reasonable
//! - [`Error::JobFailed`]: the job itself failed on the control plane
//! - [`Error::OutputRetrieval`]: the job succeeded, only the local retrieval of
//!   its encrypted outputs did not

use std::time::Duration;

use thiserror::Error;

use crate::keys::DecryptError;

/// Boxed error used for transport-level sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The manifest text is not YAML/JSON or is not a mapping.
    #[error("invalid manifest: {reason}")]
    Manifest { reason: String },

    /// Local or transport failure: unreachable host, TLS, (de)serialization.
    #[error("control plane request failed: {0}")]
    Client(#[source] BoxError),

    /// The control plane answered with a status code we did not expect.
    #[error("control plane returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    /// The caller's overall deadline elapsed while the job was still pending.
    #[error("job {job_id} did not reach a terminal state within {waited:?}")]
    DeadlineExceeded { job_id: String, waited: Duration },

    /// The job reached the `failed` state.
    #[error("job {job_id} failed: {message}")]
    JobFailed { job_id: String, message: String },

    /// The job succeeded but its outputs could not be fetched or decrypted.
    #[error("job {job_id} succeeded but its outputs could not be retrieved")]
    OutputRetrieval {
        job_id: String,
        #[source]
        source: RetrievalError,
    },
}

/// Why the outputs of a succeeded job could not be read locally.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("failed to fetch encrypted outputs")]
    Fetch(#[source] Box<Error>),

    #[error("encrypted outputs are not valid base64")]
    Decode(#[from] base64::DecodeError),

    #[error("failed to decrypt outputs")]
    Decrypt(#[from] DecryptError),
}

impl Error {
    pub fn client(source: impl Into<BoxError>) -> Self {
        Error::Client(source.into())
    }

    /// True when the remote job is known to have succeeded even though the
    /// call returned an error.
    pub fn job_succeeded(&self) -> bool {
        matches!(self, Error::OutputRetrieval { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Client(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_output_retrieval_reports_job_success() {
        let retrieval = Error::OutputRetrieval {
            job_id: "job-1".to_string(),
            source: RetrievalError::Fetch(Box::new(Error::Api {
                status: 500,
                body: "boom".to_string(),
            })),
        };
        let failed = Error::JobFailed {
            job_id: "job-1".to_string(),
            message: "quota exceeded".to_string(),
        };

        assert!(retrieval.job_succeeded());
        assert!(!failed.job_succeeded());
        assert_eq!(failed.to_string(), "job job-1 failed: quota exceeded");
    }

    #[test]
    fn api_error_keeps_status_and_body() {
        let err = Error::Api {
            status: 409,
            body: "{\"message\":\"conflict\"}".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "control plane returned HTTP 409: {\"message\":\"conflict\"}"
        );
    }
}
