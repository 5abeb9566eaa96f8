//! # Deploy Workflow
//!
//! Runs the three phases for one job:
//!
//! 1. **Key exchange**: generate a fresh key pair
//! 2. **Submit**: send the manifest with the public half attached
//! 3. **Wait**: poll to completion and decrypt the outputs with the private half
//!
//! In [`WaitMode::Detach`] the workflow stops after phase 2 and the private key
//! is dropped immediately; the job's outputs are then unreadable by anyone,
//! which is the price of not waiting.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let plane = Arc::new(HttpControlPlane::new(&config.control_plane)?);
//! let client = DeployClient::new(plane, &config.wait);
//!
//! match client
//!     .deploy(Target::new("shop", "staging"), &manifest, Mode::Deploy, WaitMode::Wait(None))
//!     .await?
//! {
//!     Deployment::Completed { outputs, .. } => println!("{:?}", outputs.to_json()?),
//!     Deployment::Submitted(job) => println!("submitted {}", job.id),
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::client::metrics::WaitStats;
use crate::client::submitter::JobSubmitter;
use crate::client::transport::ControlPlane;
use crate::client::waiter::CompletionWaiter;
use crate::common::config::WaitConfig;
use crate::common::messages::{Job, JobRequest, Mode, Outputs, Target};
use crate::error::Result;
use crate::keys::KeyPair;

/// Whether to wait for the job after submitting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Return right after submission.
    Detach,
    /// Wait up to the given duration, or the configured default.
    Wait(Option<Duration>),
}

#[derive(Debug)]
pub enum Deployment {
    /// Submitted without waiting.
    Submitted(Job),
    /// Waited for and succeeded.
    Completed { job_id: String, outputs: Outputs },
}

pub struct DeployClient<P: ?Sized> {
    submitter: JobSubmitter<P>,
    waiter: CompletionWaiter<P>,
}

impl<P: ControlPlane + ?Sized> DeployClient<P> {
    pub fn new(plane: Arc<P>, wait_config: &WaitConfig) -> Self {
        Self {
            submitter: JobSubmitter::new(plane.clone()),
            waiter: CompletionWaiter::from_config(plane, wait_config),
        }
    }

    pub fn submitter(&self) -> &JobSubmitter<P> {
        &self.submitter
    }

    pub fn waiter(&self) -> &CompletionWaiter<P> {
        &self.waiter
    }

    /// Submits a job and, unless detached, waits for its decrypted outputs.
    ///
    /// # Errors
    /// Any [`crate::Error`]: manifest errors happen before anything is sent.
    pub async fn deploy(
        &self,
        target: Target,
        manifest_text: &str,
        mode: Mode,
        wait: WaitMode,
    ) -> Result<Deployment> {
        self.deploy_with_stats(target, manifest_text, mode, wait)
            .await
            .0
    }

    /// Same as [`deploy`](Self::deploy); the stats are present whenever a
    /// wait took place, whatever its outcome.
    pub async fn deploy_with_stats(
        &self,
        target: Target,
        manifest_text: &str,
        mode: Mode,
        wait: WaitMode,
    ) -> (Result<Deployment>, Option<WaitStats>) {
        let (recipient, private_key) = KeyPair::generate().split();

        let request = match JobRequest::new(target, manifest_text, mode, recipient) {
            Ok(request) => request,
            Err(err) => return (Err(err), None),
        };

        let job = match self.submitter.submit(&request).await {
            Ok(job) => job,
            Err(err) => return (Err(err), None),
        };

        match wait {
            WaitMode::Detach => {
                drop(private_key);
                info!("🚀 Job {} submitted, not waiting for completion", job.id);
                (Ok(Deployment::Submitted(job)), None)
            }
            WaitMode::Wait(timeout) => {
                let job_id = job.id.clone();
                let (result, stats) = self.waiter.wait_from(job, timeout, private_key).await;
                let result = result.map(|outputs| Deployment::Completed { job_id, outputs });
                (result, Some(stats))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::testing::{CallKind, OutputsScript, ScriptedControlPlane, Step};
    use crate::common::messages::JobStatus;
    use crate::Error;
    use serde_json::json;

    const MANIFEST: &str = r#"{"workloads":{"main":{"variables":{"ANIMAL":"cat"}}}}"#;

    fn wait_config() -> WaitConfig {
        WaitConfig {
            default_timeout_secs: 30,
            min_poll_interval_ms: 1000,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deploy_and_wait_returns_outputs() {
        let plane = Arc::new(
            ScriptedControlPlane::new(vec![Step::RequestTimeout, Step::RequestTimeout, Step::Succeeded])
                .with_outputs(OutputsScript::Plaintext(br#"{"url":"https://example.test"}"#.to_vec())),
        );
        let client = DeployClient::new(plane.clone(), &wait_config());

        let (result, stats) = client
            .deploy_with_stats(
                Target::new("shop", "staging"),
                MANIFEST,
                Mode::Deploy,
                WaitMode::Wait(Some(Duration::from_secs(30))),
            )
            .await;

        match result.unwrap() {
            Deployment::Completed { outputs, .. } => {
                assert_eq!(outputs.to_json().unwrap(), json!({"url": "https://example.test"}));
            }
            other => panic!("unexpected deployment {other:?}"),
        }
        assert_eq!(stats.unwrap().polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn detached_deploy_never_polls() {
        let plane = Arc::new(ScriptedControlPlane::new(vec![]));
        let client = DeployClient::new(plane.clone(), &wait_config());

        let (result, stats) = client
            .deploy_with_stats(
                Target::new("shop", "staging"),
                MANIFEST,
                Mode::PlanOnly,
                WaitMode::Detach,
            )
            .await;

        assert!(matches!(result.unwrap(), Deployment::Submitted(job) if job.status == JobStatus::Pending));
        assert!(stats.is_none());
        assert!(plane.calls(CallKind::Wait).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn synchronously_failed_job_is_reported_without_polling() {
        let plane = Arc::new(ScriptedControlPlane::new(vec![]).with_created_status(JobStatus::Failed));
        let client = DeployClient::new(plane.clone(), &wait_config());

        let err = client
            .deploy(
                Target::new("shop", "staging"),
                MANIFEST,
                Mode::Deploy,
                WaitMode::Wait(None),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::JobFailed { .. }));
        assert!(plane.calls(CallKind::Wait).is_empty());
        assert!(plane.calls(CallKind::Outputs).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn bad_manifest_is_rejected_before_submission() {
        let plane = Arc::new(ScriptedControlPlane::new(vec![]));
        let client = DeployClient::new(plane.clone(), &wait_config());

        let err = client
            .deploy(
                Target::new("shop", "staging"),
                "[1, 2, 3]",
                Mode::Deploy,
                WaitMode::Wait(None),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Manifest { .. }));
        assert!(plane.calls(CallKind::Create).is_empty());
    }
}
