//! # Control Plane Transport
//!
//! The [`ControlPlane`] trait is the only way the submitter and the waiter talk
//! to the remote system. [`HttpControlPlane`] implements it over HTTP/JSON:
//!
//! ```text
//! POST {base}/orgs/{org}/jobs                          -> 201 Job
//! GET  {base}/orgs/{org}/jobs/{id}/wait                -> 200 Job | 408 still pending
//! GET  {base}/orgs/{org}/jobs/{id}/encrypted-outputs   -> 200 EncryptedOutputs
//! GET  {base}/orgs/{org}/jobs/{id}                     -> 200 Job
//! ```
//!
//! A 408 from the long-poll endpoint, or the per-request timeout firing while
//! waiting on it, is reported as [`PollResponse::RequestTimeout`] rather than
//! as an error: it is the expected "ask again" signal.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{StatusCode, Url};

use crate::common::config::ControlPlaneConfig;
use crate::common::messages::{EncryptedOutputs, Job, JobRequest};
use crate::error::{Error, Result};

/// Header carrying the submission's idempotency token.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Result of one long-poll query.
#[derive(Debug, Clone)]
pub enum PollResponse {
    /// The server answered with the job's current record.
    Job(Job),
    /// The long-poll window closed with nothing to report.
    RequestTimeout,
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Creates a job. Exactly one request; the idempotency token rides along.
    async fn create_job(&self, request: &JobRequest) -> Result<Job>;

    /// Long-polls for the job to reach a terminal state.
    async fn wait_for_completion(&self, job_id: &str) -> Result<PollResponse>;

    /// Fetches the encrypted outputs of a succeeded job.
    async fn encrypted_outputs(&self, job_id: &str) -> Result<EncryptedOutputs>;

    /// Reads the job's current record without waiting.
    async fn get_job(&self, job_id: &str) -> Result<Job>;
}

/// [`ControlPlane`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base_url: Url,
    org_id: String,
}

impl HttpControlPlane {
    /// Builds a client from configuration.
    ///
    /// # Errors
    /// Returns [`Error::Client`] for an unusable base URL or token, or when the
    /// HTTP client cannot be built.
    pub fn new(config: &ControlPlaneConfig) -> Result<Self> {
        let base_url = Url::parse(&config.base_url).map_err(Error::client)?;
        if base_url.cannot_be_a_base() {
            return Err(Error::client(format!(
                "{} cannot be used as a base URL",
                config.base_url
            )));
        }

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.api_token {
            let mut value =
                HeaderValue::from_str(&format!("Bearer {token}")).map_err(Error::client)?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .build()?;

        Ok(Self {
            client,
            base_url,
            org_id: config.org_id.clone(),
        })
    }

    /// Convenience constructor without authentication.
    pub fn with_base_url(base_url: &str, org_id: &str, request_timeout: Duration) -> Result<Self> {
        Self::new(&ControlPlaneConfig {
            base_url: base_url.to_string(),
            org_id: org_id.to_string(),
            api_token: None,
            request_timeout_secs: request_timeout.as_secs().max(1),
            connect_timeout_secs: 10,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::client(format!("{} cannot be used as a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(["orgs", self.org_id.as_str(), "jobs"])
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn create_job(&self, request: &JobRequest) -> Result<Job> {
        let url = self.endpoint(&[])?;
        debug!(
            "POST {} (idempotency key {})",
            url,
            request.idempotency_token()
        );

        let response = self
            .client
            .post(url)
            .header(IDEMPOTENCY_HEADER, request.idempotency_token().to_string())
            .json(&request.body())
            .send()
            .await?;

        if response.status() != StatusCode::CREATED {
            return Err(api_error(response).await);
        }

        Ok(response.json().await?)
    }

    async fn wait_for_completion(&self, job_id: &str) -> Result<PollResponse> {
        let url = self.endpoint(&[job_id, "wait"])?;
        debug!("GET {}", url);

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            // Only a request that reached the server was held by it.
            Err(e) if e.is_timeout() && !e.is_connect() => {
                return Ok(PollResponse::RequestTimeout)
            }
            Err(e) => return Err(e.into()),
        };

        match response.status() {
            StatusCode::OK => Ok(PollResponse::Job(response.json().await?)),
            StatusCode::REQUEST_TIMEOUT => Ok(PollResponse::RequestTimeout),
            _ => Err(api_error(response).await),
        }
    }

    async fn encrypted_outputs(&self, job_id: &str) -> Result<EncryptedOutputs> {
        let url = self.endpoint(&[job_id, "encrypted-outputs"])?;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(api_error(response).await);
        }

        Ok(response.json().await?)
    }

    async fn get_job(&self, job_id: &str) -> Result<Job> {
        let url = self.endpoint(&[job_id])?;
        debug!("GET {}", url);

        let response = self.client.get(url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(api_error(response).await);
        }

        Ok(response.json().await?)
    }
}

async fn api_error(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read response body>".to_string());
    Error::Api { status, body }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plane(base_url: &str) -> HttpControlPlane {
        HttpControlPlane::with_base_url(base_url, "acme", Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn endpoints_are_scoped_to_the_org() {
        let plane = plane("https://api.example.test");
        assert_eq!(
            plane.endpoint(&["job-1", "wait"]).unwrap().as_str(),
            "https://api.example.test/orgs/acme/jobs/job-1/wait"
        );
        assert_eq!(
            plane.endpoint(&[]).unwrap().as_str(),
            "https://api.example.test/orgs/acme/jobs"
        );
    }

    #[test]
    fn base_path_and_trailing_slash_are_kept() {
        let plane = plane("https://api.example.test/v2/");
        assert_eq!(
            plane.endpoint(&["job-1"]).unwrap().as_str(),
            "https://api.example.test/v2/orgs/acme/jobs/job-1"
        );
    }

    #[test]
    fn job_ids_are_escaped() {
        let plane = plane("https://api.example.test");
        assert_eq!(
            plane.endpoint(&["a/b", "wait"]).unwrap().as_str(),
            "https://api.example.test/orgs/acme/jobs/a%2Fb/wait"
        );
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(HttpControlPlane::with_base_url("not a url", "acme", Duration::from_secs(5)).is_err());
        assert!(HttpControlPlane::with_base_url("mailto:ops@example.test", "acme", Duration::from_secs(5)).is_err());
    }
}
