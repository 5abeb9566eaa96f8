//! # Job Submitter
//!
//! Sends a [`JobRequest`] to the control plane and returns the created [`Job`].
//!
//! The submitter never sees the private key: the request only carries the
//! recipient string. Exactly one create call is made per `submit`; transport
//! retries happen below this layer and are made safe by the request's
//! idempotency token.

use std::sync::Arc;

use log::info;

use crate::client::transport::ControlPlane;
use crate::common::messages::{format_timestamp, Job, JobRequest};
use crate::error::Result;

pub struct JobSubmitter<P: ?Sized> {
    plane: Arc<P>,
}

impl<P: ControlPlane + ?Sized> JobSubmitter<P> {
    pub fn new(plane: Arc<P>) -> Self {
        Self { plane }
    }

    /// Creates the job described by `request`.
    ///
    /// The returned job's status is whatever the control plane reported; it may
    /// already be terminal when creation completes synchronously.
    ///
    /// # Errors
    /// - [`crate::Error::Client`] when the request could not be sent or the
    ///   response could not be read
    /// - [`crate::Error::Api`] when the control plane answered with anything
    ///   but 201 Created
    pub async fn submit(&self, request: &JobRequest) -> Result<Job> {
        info!(
            "📤 Submitting {} job to {}/{}",
            request.mode(),
            request.target().project_id,
            request.target().env_id
        );

        let job = self.plane.create_job(request).await?;

        info!(
            "✅ Created job {} (status {}, created {})",
            job.id,
            job.status,
            format_timestamp(&job.created_at)
        );
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{CallKind, ScriptedControlPlane};
    use crate::common::messages::{JobStatus, Mode, Target};
    use crate::keys::KeyPair;

    fn request() -> JobRequest {
        JobRequest::new(
            Target::new("shop", "staging"),
            r#"{"workloads":{"main":{"variables":{"ANIMAL":"cat"}}}}"#,
            Mode::Deploy,
            KeyPair::generate().recipient(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn status_is_taken_verbatim() {
        let plane = Arc::new(ScriptedControlPlane::new(vec![]).with_created_status(JobStatus::Succeeded));
        let submitter = JobSubmitter::new(plane.clone());

        let job = submitter.submit(&request()).await.unwrap();

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(plane.calls(CallKind::Create).len(), 1);
    }

    #[tokio::test]
    async fn same_token_yields_same_job() {
        let plane = Arc::new(ScriptedControlPlane::new(vec![]));
        let submitter = JobSubmitter::new(plane.clone());
        let request = request();

        let first = submitter.submit(&request).await.unwrap();
        let retried = submitter.submit(&request).await.unwrap();
        let fresh = submitter.submit(&self::request()).await.unwrap();

        assert_eq!(first.id, retried.id);
        assert_ne!(first.id, fresh.id);
    }

    #[test]
    fn malformed_manifest_never_reaches_the_control_plane() {
        let result = JobRequest::new(
            Target::new("shop", "staging"),
            "workloads: [unclosed",
            Mode::Deploy,
            "age1unused",
        );
        assert!(matches!(result, Err(crate::Error::Manifest { .. })));
    }
}
