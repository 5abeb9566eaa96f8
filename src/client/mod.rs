//! # Client Components
//!
//! ## Transport ([`transport`])
//! The [`ControlPlane`] trait and its HTTP implementation.
//!
//! ## Submitter ([`submitter`])
//! Creates a job with the caller's public key attached.
//!
//! ## Waiter ([`waiter`])
//! Long-polls a job to a terminal state and decrypts its outputs:
//! - Request-level timeouts (HTTP 408) are re-polled
//! - The caller's deadline ends the wait
//! - Failed jobs are never decrypted
//!
//! ## Deploy workflow ([`deploy`])
//! Key exchange, submit and wait for one job.

pub mod deploy;
pub mod metrics;
pub mod submitter;
pub mod transport;
pub mod waiter;

#[cfg(test)]
pub(crate) mod testing;

// Re-export for convenience
pub use deploy::{DeployClient, Deployment, WaitMode};
pub use metrics::WaitStats;
pub use submitter::JobSubmitter;
pub use transport::{ControlPlane, HttpControlPlane, PollResponse};
pub use waiter::{CompletionWaiter, Outcome};
